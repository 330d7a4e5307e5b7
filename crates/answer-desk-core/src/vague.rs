//! Detection of requests too general to search, such as "이거 안돼요" or "설치하고 싶어요".

use serde::{Deserialize, Serialize};

use crate::classifier::{Boundary, Haystack};
use crate::text::compact_lower;

// Short requests that already name what they are about.
const SPECIFIC_PHRASES: [&str; 11] = [
    "포스 재설치",
    "포스 설치",
    "키오스크 터치",
    "프린터 오류",
    "백업 방법",
    "sql 설치",
    "클라우드 설치",
    "6버전 설치",
    "프로그램 실행",
    "연결 문제",
    "설정 방법",
];

// Devices, programs and documents a request can be about.
const SUBJECT_TERMS: [&str; 37] = [
    "포스", "pos", "프린터", "키오스크", "카드", "결제", "결재", "영수증", "바코드", "qr",
    "스캐너", "단말기", "드라이버", "백업", "복구", "매출", "매입", "재고", "회계", "상품",
    "엑셀", "쇼핑몰", "견적서", "거래명세서", "직인", "도장", "클라우드", "sql", "라이선스",
    "로그인", "비밀번호", "메뉴", "화면", "네트워크", "인터넷", "프로그램", "소프트웨어",
];

const VAGUE_MARKERS: [&str; 30] = [
    "이거",
    "저거",
    "그거",
    "이것",
    "저것",
    "그것",
    "이게",
    "저게",
    "그게",
    "뭔가",
    "이상해",
    "이상한",
    "하고 싶어",
    "하고 싶습니다",
    "안돼",
    "안되",
    "안됨",
    "안됩니다",
    "오류가 나",
    "오류가 발생",
    "에러가 나",
    "에러가 발생",
    "문제가 있",
    "문제가 생",
    "도와주세요",
    "도와줘",
    "도움이 필요",
    "어떻게 하나요",
    "어떻게 해요",
    "어떡해",
];

const ERROR_TERMS: [&str; 7] = ["오류", "에러", "문제", "안돼", "안되", "안됨", "실패"];

/// What a vague request seems to be about; picks the follow-up questions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VagueTopic {
    Install,
    Error,
    Code,
    General,
}

impl VagueTopic {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Error => "error",
            Self::Code => "code",
            Self::General => "general",
        }
    }

    fn heading(self) -> &'static str {
        match self {
            Self::Install => "설치와 관련된 질문이시군요. 더 구체적으로 말씀해 주세요:",
            Self::Error => "오류나 문제가 발생하셨군요. 더 구체적으로 말씀해 주세요:",
            Self::Code => "코드와 관련된 질문이시군요. 더 구체적으로 말씀해 주세요:",
            Self::General => {
                "더 구체적으로 말씀해 주시면 정확한 답변을 드릴 수 있습니다. 예를 들어:"
            }
        }
    }

    /// Follow-up questions for this topic, or example queries for [`VagueTopic::General`].
    #[must_use]
    pub fn examples(self) -> &'static [&'static str] {
        match self {
            Self::Install => &[
                "어떤 프로그램을 설치하시려고 하나요? (포스, 클라우드, 키오스크 등)",
                "신규 설치인가요, 재설치인가요?",
                "설치 중 오류가 발생했나요?",
            ],
            Self::Error => &[
                "어떤 장비에서 문제가 발생했나요? (포스, 키오스크, 프린터 등)",
                "어떤 오류 메시지가 나타났나요?",
                "언제부터 문제가 발생했나요?",
            ],
            Self::Code => &[
                "설치 코드가 필요하신가요?",
                "코드 입력 중 오류가 발생했나요?",
                "코드를 찾을 수 없나요?",
            ],
            Self::General => {
                &["포스 재설치 방법", "키오스크 터치 오류 해결", "프린터 연결 문제", "백업 방법"]
            }
        }
    }

    /// User-facing request for detail, listing [`VagueTopic::examples`] as bullets.
    #[must_use]
    pub fn prompt(self) -> String {
        let bullets = self
            .examples()
            .iter()
            .map(|example| format!("• {example}"))
            .collect::<Vec<_>>()
            .join("\n");
        let closing = match self {
            Self::General => "\n\n어떤 부분에 대해 도움이 필요하신가요?",
            _ => "",
        };
        format!("{}\n\n{bullets}{closing}", self.heading())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VagueInput {
    pub topic: VagueTopic,
    pub matched_words: Vec<String>,
}

/// Flag input that asks for help without naming a device, program or document.
///
/// Input is vague when it uses a vague expression ("이거", "안돼요", "설치하고 싶어요") and
/// names no subject. A bare topic word such as "오류" is not vague; search handles it.
#[must_use]
pub fn detect_vague_input(text: &str) -> Option<VagueInput> {
    let haystack = Haystack::new(text);
    let compact = haystack.compact();
    if compact.is_empty() {
        return None;
    }
    if SPECIFIC_PHRASES.iter().any(|phrase| compact.contains(&compact_lower(phrase))) {
        return None;
    }
    if SUBJECT_TERMS.iter().any(|term| haystack.matches(term, Boundary::Anywhere)) {
        return None;
    }

    let matched_words = VAGUE_MARKERS
        .iter()
        .filter(|marker| haystack.matches(marker, Boundary::Anywhere))
        .map(|marker| (*marker).to_string())
        .collect::<Vec<_>>();
    if matched_words.is_empty() {
        return None;
    }

    let topic = if compact.contains("설치") {
        VagueTopic::Install
    } else if ERROR_TERMS.iter().any(|term| compact.contains(term)) {
        VagueTopic::Error
    } else if compact.contains("코드") {
        VagueTopic::Code
    } else {
        VagueTopic::General
    };
    Some(VagueInput { topic, matched_words })
}
