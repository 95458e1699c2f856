use serde::{Deserialize, Serialize};

/// 报告叙述文字的目标语言
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum TargetLanguage {
    #[serde(rename = "zh")]
    Chinese,
    #[serde(rename = "en")]
    #[default]
    English,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "ru")]
    Russian,
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetLanguage::Chinese => write!(f, "zh"),
            TargetLanguage::English => write!(f, "en"),
            TargetLanguage::Japanese => write!(f, "ja"),
            TargetLanguage::Korean => write!(f, "ko"),
            TargetLanguage::German => write!(f, "de"),
            TargetLanguage::French => write!(f, "fr"),
            TargetLanguage::Russian => write!(f, "ru"),
        }
    }
}

impl std::str::FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zh" | "chinese" | "中文" => Ok(TargetLanguage::Chinese),
            "en" | "english" | "英文" => Ok(TargetLanguage::English),
            "ja" | "japanese" | "日本語" | "日文" => Ok(TargetLanguage::Japanese),
            "ko" | "korean" | "한국어" | "韩文" => Ok(TargetLanguage::Korean),
            "de" | "german" | "deutsch" | "德文" => Ok(TargetLanguage::German),
            "fr" | "french" | "français" | "法文" => Ok(TargetLanguage::French),
            "ru" | "russian" | "русский" | "俄文" => Ok(TargetLanguage::Russian),
            _ => Err(format!("Unknown target language: {}", s)),
        }
    }
}

impl TargetLanguage {
    /// 获取语言的提示词指令，只约束叙述性字段，JSON字段名保持英文
    pub fn prompt_instruction(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => {
                "请使用中文撰写所有叙述性内容，JSON字段名保持英文不变，确保表达准确、专业、便于营销人员理解。"
            }
            TargetLanguage::English => {
                "Write all narrative values in English. Keep JSON field names exactly as specified. Be precise, professional and easy for a marketer to act on."
            }
            TargetLanguage::Japanese => {
                "すべての説明文は日本語で記述してください。JSONのフィールド名は指定どおり英語のままにしてください。"
            }
            TargetLanguage::Korean => {
                "모든 서술형 내용은 한국어로 작성해 주세요. JSON 필드 이름은 지정된 영어 그대로 유지해 주세요."
            }
            TargetLanguage::German => {
                "Bitte verfassen Sie alle beschreibenden Inhalte auf Deutsch. Die JSON-Feldnamen bleiben unverändert auf Englisch."
            }
            TargetLanguage::French => {
                "Veuillez rédiger tous les contenus descriptifs en français. Les noms de champs JSON restent en anglais, tels que spécifiés."
            }
            TargetLanguage::Russian => {
                "Пожалуйста, пишите весь описательный текст на русском языке. Имена полей JSON оставьте на английском, как указано."
            }
        }
    }
}
