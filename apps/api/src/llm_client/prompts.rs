// All LLM prompt constants for the generation pipeline stages.

/// System prompt for job-description analysis — enforces JSON-only output.
pub const JD_ANALYSIS_SYSTEM: &str =
    "You are an expert job description analyst and resume strategist. \
    Parse a job description and extract structured information. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Job-description analysis prompt template. Replace `{jd_text}` before sending.
pub const JD_ANALYSIS_PROMPT_TEMPLATE: &str = r#"Parse the following job description and extract structured information.

Return a JSON object with this EXACT schema (no extra fields):
{
  "hard_requirements": [
    {"text": "5+ years Rust programming", "is_required": true}
  ],
  "soft_signals": [
    "Kubernetes experience a plus"
  ],
  "seniority": "senior",
  "keyword_inventory": [
    {
      "keyword": "Rust",
      "frequency": 5,
      "position_weight": 0.8,
      "weighted_score": 4.0
    }
  ],
  "detected_tone": "CollaborativeEnterprise"
}

Rules for parsing:

POSITION WEIGHTS for keyword scoring:
- Title / header: 1.0
- Requirements section ("Required:", "Must have:", "You need:"): 0.8
- Responsibilities section ("You will:", "Responsibilities:"): 0.6
- About Us / company section: 0.3
weighted_score = frequency * position_weight

TONE OPTIONS (pick exactly one):
- "AggressiveStartup": fast-paced language — "own", "drive", "move fast", "spearhead", "disrupt"
- "CollaborativeEnterprise": team-oriented — "partner", "collaborate", "contribute", "support teams"
- "ResearchOriented": academic / investigative — "investigate", "publish", "evaluate", "propose"
- "ProductOriented": shipping focus — "ship", "launch", "deliver", "improve user experience"

HARD REQUIREMENTS: Explicit must-haves — phrases like "required", "must have", "you will need", minimum years.
SOFT SIGNALS: Nice-to-haves — phrases like "preferred", "bonus", "nice to have", "plus".

SENIORITY: "junior", "mid", "senior", "staff", "principal", "director", or "unknown".

Extract ALL meaningful technical keywords (languages, frameworks, tools, concepts) and score them.

JOB DESCRIPTION:
{jd_text}"#;

/// System prompt for content optimization — enforces JSON-only output.
pub const OPTIMIZE_SYSTEM: &str = "You are an expert resume writer aligning an \
    existing resume against a target job description. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT invent employers, titles, dates, degrees, or accomplishments \
    that are not present in the source document.";

/// Content optimization prompt template.
/// Replace: {source_text}, {keywords_json}, {requirements_summary},
///          {strong_verbs}, {avoid_verbs}
pub const OPTIMIZE_PROMPT_TEMPLATE: &str = r#"Rewrite the source resume below so it aligns with the target role while staying strictly factual.

TONE CALIBRATION for this role:
- Prefer verbs like: {strong_verbs}
- Avoid verbs like: {avoid_verbs}

TARGET KEYWORDS to incorporate naturally where the source supports them (do NOT keyword-stuff):
{keywords_json}

KEY REQUIREMENTS of the role:
{requirements_summary}

SOURCE RESUME (source of truth — ONLY use facts from this):
{source_text}

Return a JSON object:
{
  "sections": [
    {
      "heading": "Experience",
      "body": "Rewritten section content, one bullet per line starting with '- '"
    }
  ],
  "confidence": 85
}

HARD RULES:
1. Keep every section of the source that has content; preserve its ordering
2. Use ONLY facts from the source — no interpolation, no invention
3. Incorporate target keywords only where the source genuinely supports them
4. `confidence` is an integer 0-100: how well the rewritten resume covers the role's requirements
5. Keep bullets dense and specific; drop filler phrases"#;
