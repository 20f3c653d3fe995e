//! Short-form script writer backed by the Gemini `generateContent` API.
//!
//! The model is asked for a JSON object `{script, title, description}`. A reply
//! that does not parse into a complete draft gets exactly one reformatting
//! retry; a second failure is returned as an error.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{ProviderError, check_status, require_key};

const PROVIDER: &str = "Gemini";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_OUTPUT_TOKENS: u32 = 1024;
pub const BASE_TEMPERATURE: f64 = 0.8;
const REFORMAT_TEMPERATURE: f64 = 0.2;

const TONES: &[(&str, &str)] = &[
    ("casual", "친근한 해요체 (~해요, ~예요, ~죠). 부드럽고 친근하게."),
    ("formal", "정중한 합니다체 (~합니다, ~습니다). 뉴스 앵커처럼 신뢰감 있게."),
    ("info", "정보 전달형. 팩트 중심, 간결하고 명확하게. ~이다, ~한다 체."),
    ("hype", "흥분 자극형! 느낌표 많이! 대박! 충격! 미쳤다! 이거 실화냐? 식으로."),
    ("community", "커뮤 감성 중립. ~함, ~임 체. 담백하게 정보 전달. ㅋㅋ 적당히."),
    ("rough", "거친 직설형. 시비 거는 느낌. 뭐? 이것도 몰라? 진짜? 답답하네."),
    ("sarcastic", "냉소적 비꼼. 아~ 그렇구나~ 대단하시네~ 비꼬는 느낌."),
    ("cute", "귀여운 애교 (~용, ~당, ~쪄). 응~ 그래용~ 대박이당~ 느낌."),
];

const THEMES: &[(&str, &str)] = &[
    ("money", "재테크, 돈 관리, 부자 습관"),
    ("motivation", "동기부여, 힘이 되는 말"),
    ("selfdev", "자기계발, 성장"),
    ("love", "연애, 썸, 관계"),
    ("horror", "공포, 괴담, 무서운 이야기"),
    ("tips", "생활 꿀팁, 유용한 정보"),
    ("facts", "신기한 상식, 몰랐던 사실"),
    ("health", "건강, 운동, 다이어트"),
    ("korea", "한국의 장점, 국뽕"),
    ("international", "국제커플, 국제결혼"),
];

const EXAMPLE_SCRIPT: &str = "일본 여자가 한국 생활하며 가장 힘든 점.
첫 번째 매운 음식 지옥.
김치 떡볶이 매운탕 다 매워서 먹을게 없음.
두 번째 미세먼지 때문에 죽을것 같음.
일본은 공기 깨끗한데 한국은 마스크 필수.
세 번째 전월세 시스템 이해 불가.
일본은 보증금 적은데 한국은 억단위라 충격.
네 번째 그래도 한국 남자 때문에 버팀.
힘들어도 사랑하는 남자 있어서 행복하다고.";

const RULES: &[&str] = &[
    "후킹 문장으로 시작 (자극적, 충격적, 궁금증 유발)",
    "\"첫 번째\", \"두 번째\" 등 번호 매겨서 5~7개 포인트",
    "각 포인트는 제목 한줄 + 구체적 설명 한줄 (총 2문장씩)",
    "비교/대조 형식 적극 활용 (A는 이런데 B는 저럼)",
    "위에서 지정한 말투를 반드시 일관되게 사용",
    "숫자/통계 적극 활용 (10만원, 3개월, 100번 등)",
    "50~60초 분량 (400~500자)",
    "마지막에 구독/좋아요 유도 또는 다음 영상 암시",
];

const VARIATION_RULE: &str = "같은 주제라도 매번 다른 각도와 내용으로 작성";

/// Unknown or missing tones fall back to `casual`.
pub fn tone_hint(tone: Option<&str>) -> &'static str {
    tone.and_then(|t| TONES.iter().find(|(k, _)| *k == t.trim()))
        .map(|(_, v)| *v)
        .unwrap_or(TONES[0].1)
}

pub fn theme_hint(theme: Option<&str>) -> Option<&'static str> {
    theme
        .and_then(|t| THEMES.iter().find(|(k, _)| *k == t.trim()))
        .map(|(_, v)| *v)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDraft {
    pub script: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub topic: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

/// Prompt for one draft. `varied` adds the rule asking for a fresh angle, used by batches.
pub fn build_prompt(request: &ScriptRequest, varied: bool) -> String {
    let mut prompt = format!("너는 유튜브 쇼츠 바이럴 대본 작가야.\n\n주제: {}\n", request.topic.trim());
    if let Some(theme) = theme_hint(request.theme.as_deref()) {
        prompt.push_str(&format!("분위기: {theme}\n"));
    }
    prompt.push_str(&format!("말투: {}\n\n", tone_hint(request.tone.as_deref())));
    prompt.push_str(&format!("예시:\n\"{EXAMPLE_SCRIPT}\"\n\n작성 규칙:\n"));

    let extra = varied.then_some(VARIATION_RULE);
    for (i, rule) in RULES.iter().copied().chain(extra).enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
    }

    prompt.push_str(
        "\nJSON 형식으로만 답변:\n{\n  \"script\": \"대본 (줄바꿈은 \\n)\",\n  \"title\": \"자극적 제목 15자 이내\",\n  \"description\": \"설명 2줄\\n\\n#해시태그 5~7개\"\n}",
    );
    prompt
}

fn reformat_prompt(reply: &str) -> String {
    format!(
        "다음 답변을 \"script\", \"title\", \"description\" 세 개의 문자열 키만 가진 JSON 객체 하나로 다시 작성해. JSON 외의 텍스트는 쓰지 마.\n\n{reply}"
    )
}

fn fence_regex() -> Result<&'static Regex> {
    static FENCE_RE: OnceCell<Regex> = OnceCell::new();
    FENCE_RE.get_or_try_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").context("failed to compile fence regex")
    })
}

/// The body of the first fenced block, or the whole reply.
pub fn extract_json_block(reply: &str) -> Result<&str> {
    let reply = reply.trim();
    Ok(fence_regex()?
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply))
}

/// Strict parse: a JSON object with non-empty `script`, `title` and `description`.
pub fn parse_draft(reply: &str) -> Result<ScriptDraft> {
    let body = extract_json_block(reply)?;
    let draft: ScriptDraft = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(PROVIDER, format!("reply is not a script object: {e}")))?;
    for (field, value) in [
        ("script", &draft.script),
        ("title", &draft.title),
        ("description", &draft.description),
    ] {
        if value.trim().is_empty() {
            return Err(ProviderError::malformed(PROVIDER, format!("empty {field}")).into());
        }
    }
    Ok(draft)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Text of the first candidate. Safety blocks and empty candidates are errors.
pub fn reply_text(body: &str) -> Result<String, ProviderError> {
    let resp: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::malformed(
            PROVIDER,
            format!("blocked by safety filters: {reason}"),
        ));
    }
    resp.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::malformed(PROVIDER, "no candidate text"))
}

#[derive(Clone)]
pub struct Gemini {
    client: Client,
    api_key: String,
    model: String,
}

impl Gemini {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self { client, api_key, model }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String> {
        require_key(PROVIDER, &self.api_key)?;

        let url = format!("{BASE_URL}/{}:generateContent", self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            },
        });

        let resp = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let resp = check_status(PROVIDER, resp).await?;
        let text = resp.text().await.map_err(ProviderError::transport(PROVIDER))?;
        Ok(reply_text(&text)?)
    }

    /// Write one draft. `varied` selects the batch prompt.
    pub async fn generate(&self, request: &ScriptRequest, temperature: f64, varied: bool) -> Result<ScriptDraft> {
        let reply = self.complete(&build_prompt(request, varied), temperature).await?;
        match parse_draft(&reply) {
            Ok(draft) => {
                info!(topic = %request.topic, title = %draft.title, "Script generated");
                Ok(draft)
            }
            Err(e) => {
                warn!(topic = %request.topic, error = %e, "Script reply unparsable, asking for reformat");
                let retry = self.complete(&reformat_prompt(&reply), REFORMAT_TEMPERATURE).await?;
                parse_draft(&retry).context("Script reply unparsable after reformat")
            }
        }
    }
}
