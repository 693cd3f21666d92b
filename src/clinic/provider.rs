use std::time::Duration;

use async_trait::async_trait;
use chatgpt::client::ChatGPT;
use chatgpt::types::CompletionResponse;
use thiserror::Error;

use super::{Case, InvalidCase, Observations};

pub const API_KEY_VAR: &str = "CHATGPT_API_KEY";
pub const TEMPERATURE: f32 = 1.0;
pub const FALLBACK_DELAY: Duration = Duration::from_millis(1500);

const SYSTEM_INSTRUCTION: &str = "You are a senior TCM professor designing exam questions. \
Generate realistic, distinct clinical cases. Ensure the 'wrongOptions' are related enough to be \
confusing for a student but clearly incorrect based on the signs. \
Reply with a single JSON object and nothing else.";

const CASE_INSTRUCTION: &str = "生成一个中医执业医师考试水平的临床接诊病例。包括病人主诉、面色、舌象、脉象。\
提供一个正确的辨证诊断和三个错误的干扰项。所有内容用中文。";

#[derive(Error, Debug)]
pub enum CaseError {
    #[error("The model request failed: {0}")]
    Generation(#[from] chatgpt::err::Error),
    #[error("The model returned an empty reply")]
    EmptyReply,
    #[error("The model reply is not a valid case object: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("The generated case breaks an invariant: {0}")]
    Invalid(#[from] InvalidCase),
    #[error("The case fetch was interrupted: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}

/// Something that can come up with a brand new case, or fail trying.
#[async_trait]
pub trait CaseSource: Send + Sync {
    async fn generate(&self) -> Result<Case, CaseError>;
}

pub struct CaseProvider {
    source: Option<Box<dyn CaseSource>>,
    fallback_delay: Duration,
}

impl CaseProvider {
    pub fn new(source: Option<Box<dyn CaseSource>>) -> Self {
        Self {
            source,
            fallback_delay: FALLBACK_DELAY,
        }
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Never fails: any problem with the source is logged and the
    /// fallback case is served instead.
    pub async fn fetch_case(&self) -> Case {
        let source = match &self.source {
            Some(source) => source,
            None => {
                if !self.fallback_delay.is_zero() {
                    tokio::time::sleep(self.fallback_delay).await;
                }
                return fallback_case();
            }
        };

        match source.generate().await {
            Ok(case) => case,
            Err(err) => {
                log::warn!("Case generation failed, serving the fallback case: {}", err);
                fallback_case()
            }
        }
    }
}

pub fn api_key_from(value: Option<String>) -> Option<String> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

pub fn read_api_key() -> Option<String> {
    let key = api_key_from(std::env::var(API_KEY_VAR).ok());
    if key.is_none() {
        log::warn!("{} is not set, every case will be the fallback case", API_KEY_VAR);
    }
    key
}

pub struct CaseGenerator {
    chat_gpt: ChatGPT,
}

impl CaseGenerator {
    pub fn new(mut chat_gpt: ChatGPT) -> Self {
        chat_gpt.config.temperature = TEMPERATURE;
        Self { chat_gpt }
    }
}

#[async_trait]
impl CaseSource for CaseGenerator {
    async fn generate(&self) -> Result<Case, CaseError> {
        log::debug!("Requesting a new case from the model");
        let mut conversation = self.chat_gpt.new_conversation_directed(SYSTEM_INSTRUCTION);
        let response: CompletionResponse = conversation.send_message(case_prompt()).await?;
        let content = response.message().clone().content;

        log::debug!("Completion: {:?}", content);

        parse_case(&content)
    }
}

fn case_prompt() -> String {
    format!(
        "{}\n\n严格按照以下 JSON Schema 输出一个 JSON 对象，不要输出任何其他文字：\n{:#}",
        CASE_INSTRUCTION,
        case_schema()
    )
}

fn case_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "patientName": { "type": "string" },
            "appearance": {
                "type": "object",
                "properties": {
                    "face": { "type": "string", "description": "Description of face color/expression (e.g. 面色潮红)" },
                    "tongue": { "type": "string", "description": "Description of tongue body and coating (e.g. 舌红苔黄腻)" },
                    "pulse": { "type": "string", "description": "Description of pulse type (e.g. 脉滑数)" }
                },
                "required": ["face", "tongue", "pulse"]
            },
            "complaint": { "type": "string", "description": "First person complaint from patient (e.g. '我感觉...')" },
            "correctDiagnosis": { "type": "string", "description": "The correct TCM Syndrome Differentiation (e.g. 肝胆湿热证)" },
            "wrongOptions": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 3,
                "maxItems": 3,
                "description": "3 plausible but incorrect diagnoses"
            },
            "explanation": { "type": "string", "description": "Short explanation of why the diagnosis is correct based on symptoms." }
        },
        "required": ["patientName", "appearance", "complaint", "correctDiagnosis", "wrongOptions", "explanation"]
    })
}

// Takes the outermost {...} so code fences or chatter around it are fine.
pub fn parse_case(reply: &str) -> Result<Case, CaseError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(CaseError::EmptyReply);
    }

    let json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply,
    };

    let case: Case = serde_json::from_str(json)?;
    case.validate()?;
    Ok(case)
}

pub fn fallback_case() -> Case {
    Case {
        patient_name: "张三".to_string(),
        observations: Observations {
            face: "面色淡白无华".to_string(),
            tongue: "舌淡苔白".to_string(),
            pulse: "脉细弱".to_string(),
        },
        complaint: "大夫，我最近总是感觉头晕眼花，心慌心悸，干一点活就累得不行，脸色也难看。"
            .to_string(),
        correct_diagnosis: "气血亏虚证".to_string(),
        distractors: [
            "肝阳上亢证".to_string(),
            "痰湿中阻证".to_string(),
            "肾阳虚衰证".to_string(),
        ],
        explanation: "患者面色淡白、舌淡脉细弱均为血虚之象；气短乏力、动则加剧为气虚之象。气血双亏，故见头晕眼花、心悸等。"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const GENERATED: &str = r#"{
        "patientName": "李四",
        "appearance": { "face": "面色潮红", "tongue": "舌红苔黄腻", "pulse": "脉滑数" },
        "complaint": "我感觉胁肋胀痛，口苦，小便黄。",
        "correctDiagnosis": "肝胆湿热证",
        "wrongOptions": ["脾胃虚寒证", "肝郁气滞证", "胃阴不足证"],
        "explanation": "胁肋胀痛、口苦、舌红苔黄腻、脉滑数，均为肝胆湿热之征。"
    }"#;

    struct FakeSource {
        reply: Box<dyn Fn() -> Result<Case, CaseError> + Send + Sync>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CaseSource for FakeSource {
        async fn generate(&self) -> Result<Case, CaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)()
        }
    }

    fn provider_with(
        reply: impl Fn() -> Result<Case, CaseError> + Send + Sync + 'static,
    ) -> (CaseProvider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            reply: Box::new(reply),
            calls: calls.clone(),
        };
        (CaseProvider::new(Some(Box::new(source))), calls)
    }

    #[test]
    fn parses_plain_json_reply() {
        let case = parse_case(GENERATED).unwrap();
        assert_eq!(case.patient_name, "李四");
        assert_eq!(case.observations.pulse, "脉滑数");
        assert_eq!(case.correct_diagnosis, "肝胆湿热证");
        assert_eq!(case.distractors[2], "胃阴不足证");
    }

    #[test]
    fn parses_fenced_json_reply() {
        let reply = format!("好的，病例如下：\n```json\n{}\n```", GENERATED);
        let case = parse_case(&reply).unwrap();
        assert_eq!(case.correct_diagnosis, "肝胆湿热证");
    }

    #[test]
    fn empty_reply_is_an_error() {
        assert!(matches!(parse_case("  \n"), Err(CaseError::EmptyReply)));
    }

    #[test]
    fn wrong_number_of_distractors_is_malformed() {
        let reply = GENERATED.replace(r#""胃阴不足证""#, r#""胃阴不足证", "心火亢盛证""#);
        assert!(matches!(parse_case(&reply), Err(CaseError::Malformed(_))));
    }

    #[test]
    fn missing_field_is_malformed() {
        let reply = r#"{"patientName": "王五", "complaint": "头痛"}"#;
        assert!(matches!(parse_case(reply), Err(CaseError::Malformed(_))));
    }

    #[test]
    fn distractor_matching_diagnosis_is_invalid() {
        let reply = GENERATED.replace("脾胃虚寒证", "肝胆湿热证");
        assert!(matches!(
            parse_case(&reply),
            Err(CaseError::Invalid(InvalidCase::DistractorIsCorrect(_)))
        ));
    }

    #[test]
    fn schema_lists_every_case_field() {
        let schema = case_schema();
        let required = schema["required"].as_array().unwrap();
        for field in [
            "patientName",
            "appearance",
            "complaint",
            "correctDiagnosis",
            "wrongOptions",
            "explanation",
        ] {
            assert!(required.iter().any(|r| r == field), "{} missing", field);
        }
    }

    #[test]
    fn prompt_carries_the_whole_schema() {
        let prompt = case_prompt();
        assert!(prompt.starts_with(CASE_INSTRUCTION));
        assert!(prompt.contains(r#""correctDiagnosis""#));
        assert!(prompt.contains(r#""maxItems": 3"#));

        let schema_start = prompt.find('{').unwrap();
        let embedded: serde_json::Value = serde_json::from_str(&prompt[schema_start..]).unwrap();
        assert_eq!(embedded, case_schema());
    }

    #[test]
    fn blank_api_key_means_no_model() {
        assert_eq!(api_key_from(None), None);
        assert_eq!(api_key_from(Some("   ".to_string())), None);
        assert_eq!(
            api_key_from(Some(" sk-test \n".to_string())),
            Some("sk-test".to_string())
        );
    }

    #[tokio::test]
    async fn serves_generated_case() {
        let (provider, calls) = provider_with(|| parse_case(GENERATED));
        let case = provider.fetch_case().await;
        assert_eq!(case.correct_diagnosis, "肝胆湿热证");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_fetch_asks_the_source_again() {
        let (provider, calls) = provider_with(|| parse_case(GENERATED));
        provider.fetch_case().await;
        provider.fetch_case().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_when_the_source_fails() {
        let (provider, _) = provider_with(|| Err(CaseError::EmptyReply));
        assert_eq!(provider.fetch_case().await, fallback_case());

        let (provider, _) = provider_with(|| parse_case("not json at all"));
        assert_eq!(provider.fetch_case().await, fallback_case());

        let (provider, _) = provider_with(|| Err(CaseError::Invalid(InvalidCase::BlankDiagnosis)));
        let case = provider.fetch_case().await;
        assert_eq!(case, fallback_case());
        assert_eq!(case.validate(), Ok(()));
    }

    #[tokio::test]
    async fn falls_back_without_a_source() {
        let provider = CaseProvider::new(None).with_fallback_delay(Duration::ZERO);
        assert_eq!(provider.fetch_case().await, fallback_case());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_without_a_source_simulates_latency() {
        let provider = CaseProvider::new(None);
        let started = tokio::time::Instant::now();
        provider.fetch_case().await;
        assert!(started.elapsed() >= FALLBACK_DELAY);
    }
}
