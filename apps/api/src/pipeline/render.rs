//! Document Rendering — turns the optimized document into a binary artifact
//! through a LaTeX template, with a plain-text mode for cheap rendering.
//!
//! Renderer instances are expensive to start (TeX toolchain warm-up in a
//! scratch workspace), so a small fixed pool is built once and instances
//! are checked out per job and returned on drop — on both the success and
//! failure paths.

use std::process::Stdio;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::pipeline::optimizer::OptimizedDocument;
use crate::pipeline::{StageError, StageKind};

const STAGE: StageKind = StageKind::DocumentRendering;

/// The TeX engine invoked inside each renderer workspace.
const TEX_ENGINE: &str = "tectonic";
const TEX_SOURCE: &str = "resume.tex";
const TEX_OUTPUT: &str = "resume.pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Pdf,
    /// Cheap mode: a UTF-8 text artifact. Compatibility scoring is
    /// independent of the mode, so nothing downstream changes.
    Text,
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(RenderMode::Pdf),
            "text" => Ok(RenderMode::Text),
            other => Err(format!("unknown render mode '{other}'")),
        }
    }
}

/// A rendered artifact plus the metadata packaging needs.
#[derive(Debug, Clone)]
pub struct DocumentArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// One reusable renderer instance with its own scratch workspace. The
/// workspace persists across jobs so the TeX toolchain's caches stay warm.
pub struct Renderer {
    id: usize,
    workspace: TempDir,
}

impl Renderer {
    fn new(id: usize) -> Result<Self> {
        let workspace = TempDir::new().context("failed to create renderer workspace")?;
        info!(renderer = id, path = %workspace.path().display(), "Renderer workspace ready");
        Ok(Renderer { id, workspace })
    }

    pub async fn render(
        &self,
        document: &OptimizedDocument,
        mode: RenderMode,
    ) -> Result<DocumentArtifact, StageError> {
        match mode {
            RenderMode::Text => Ok(render_text(document)),
            RenderMode::Pdf => self.render_pdf(document).await,
        }
    }

    async fn render_pdf(&self, document: &OptimizedDocument) -> Result<DocumentArtifact, StageError> {
        let tex = render_latex(document);
        let source_path = self.workspace.path().join(TEX_SOURCE);

        let mut file = tokio::fs::File::create(&source_path)
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("workspace write failed: {e}")))?;
        file.write_all(tex.as_bytes())
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("workspace write failed: {e}")))?;
        file.flush()
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("workspace write failed: {e}")))?;

        debug!(renderer = self.id, "Invoking TeX engine");
        let output = Command::new(TEX_ENGINE)
            .arg(TEX_SOURCE)
            .current_dir(self.workspace.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("failed to spawn {TEX_ENGINE}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::upstream(
                STAGE,
                format!("{TEX_ENGINE} exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let bytes = tokio::fs::read(self.workspace.path().join(TEX_OUTPUT))
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("render output missing: {e}")))?;

        Ok(DocumentArtifact {
            bytes,
            content_type: "application/pdf",
            extension: "pdf",
        })
    }
}

fn render_text(document: &OptimizedDocument) -> DocumentArtifact {
    let mut out = String::new();
    for section in &document.sections {
        out.push_str(&section.heading.to_uppercase());
        out.push('\n');
        out.push_str(&section.body);
        out.push_str("\n\n");
    }
    DocumentArtifact {
        bytes: out.into_bytes(),
        content_type: "text/plain; charset=utf-8",
        extension: "txt",
    }
}

/// Fills the LaTeX template. All caller-controlled text is escaped.
fn render_latex(document: &OptimizedDocument) -> String {
    let mut body = String::new();
    for section in &document.sections {
        body.push_str(&format!("\\section*{{{}}}\n", escape_latex(&section.heading)));
        body.push_str("\\begin{itemize}[leftmargin=*]\n");
        for line in section.body.lines() {
            let line = line.trim().trim_start_matches("- ");
            if line.is_empty() {
                continue;
            }
            body.push_str(&format!("  \\item {}\n", escape_latex(line)));
        }
        body.push_str("\\end{itemize}\n");
    }

    format!(
        "\\documentclass[11pt]{{article}}\n\
         \\usepackage[margin=1in]{{geometry}}\n\
         \\usepackage{{enumitem}}\n\
         \\pagestyle{{empty}}\n\
         \\begin{{document}}\n\
         {body}\
         \\end{{document}}\n"
    )
}

fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '#' | '$' | '%' | '&' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Fixed-size pool of renderers. Checkout waits until an instance is free;
/// the guard returns its instance when dropped, whatever happened in
/// between.
pub struct RendererPool {
    tx: mpsc::Sender<Renderer>,
    rx: Mutex<mpsc::Receiver<Renderer>>,
    size: usize,
}

impl RendererPool {
    /// Builds `size` renderers eagerly so the startup cost is paid once,
    /// before any job is claimed.
    pub fn new(size: usize) -> Result<Self> {
        anyhow::ensure!(size > 0, "renderer pool size must be at least 1");
        let (tx, rx) = mpsc::channel(size);
        for id in 0..size {
            let renderer = Renderer::new(id)?;
            tx.try_send(renderer)
                .map_err(|_| anyhow::anyhow!("renderer pool channel under-sized"))?;
        }
        Ok(RendererPool {
            tx,
            rx: Mutex::new(rx),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub async fn checkout(&self) -> Result<PooledRenderer, StageError> {
        let renderer = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| StageError::upstream(STAGE, "renderer pool closed"))?;
        Ok(PooledRenderer {
            renderer: Some(renderer),
            tx: self.tx.clone(),
        })
    }
}

/// Checkout guard. Dropping it returns the renderer to the pool.
pub struct PooledRenderer {
    renderer: Option<Renderer>,
    tx: mpsc::Sender<Renderer>,
}

impl std::ops::Deref for PooledRenderer {
    type Target = Renderer;

    fn deref(&self) -> &Renderer {
        // Present from construction until drop.
        self.renderer.as_ref().expect("renderer taken before drop")
    }
}

impl Drop for PooledRenderer {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            // Capacity equals pool size, so the send cannot be rejected for
            // a renderer that actually belongs to this pool.
            let _ = self.tx.try_send(renderer);
        }
    }
}
