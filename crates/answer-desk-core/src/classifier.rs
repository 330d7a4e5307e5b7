use serde::{Deserialize, Serialize};

use crate::text::{compact_lower, fold, spaced_lower};

const ABUSIVE_TERMS: [&str; 20] = [
    "바보", "멍청", "새끼", "씨발", "씨바", "병신", "미친놈", "미친년", "꺼져", "닥쳐", "개새",
    "좆", "존나", "fuck", "fucking", "shit", "bitch", "idiot", "stupid", "asshole",
];

const HANDOFF_TERMS: [&str; 14] = [
    "상담사 연결",
    "상담원 연결",
    "상담사와 통화",
    "상담원과 통화",
    "상담사랑 통화",
    "상담사 바꿔",
    "상담원 바꿔",
    "직원 연결",
    "사람이랑 통화",
    "전화 상담",
    "human agent",
    "real person",
    "talk to a human",
    "connect me",
];

const GREETING_TERMS: [&str; 16] = [
    "안녕하세요",
    "안녕",
    "반갑습니다",
    "반가워요",
    "좋은 아침",
    "좋은 오후",
    "좋은 저녁",
    "하이",
    "hi",
    "hello",
    "바쁘시죠",
    "잘 지내",
    "식사하셨",
    "어떻게 지내",
    "수고하세요",
    "수고많으십니다",
];

const TECHNICAL_TERMS: [&str; 44] = [
    "설치", "설정", "오류", "에러", "문제", "해결", "방법", "프로그램", "소프트웨어", "하드웨어",
    "기기", "장비", "스캐너", "프린터", "포스", "pos", "시스템", "네트워크", "연결", "인터넷",
    "데이터", "백업", "복구", "업데이트", "키오스크", "영수증", "결재", "결제", "카드", "단말기",
    "로그인", "비밀번호", "출력", "재설치", "드라이버", "라이선스", "다운로드", "바코드", "매출",
    "메뉴", "화면", "코드", "error", "printer",
];

const OFFTOPIC_TERMS: [&str; 30] = [
    "역사", "지리", "정치", "경제", "대통령", "선거", "독도", "날씨", "기후", "영화", "드라마",
    "음악", "노래", "축구", "야구", "농구", "여행", "관광", "연예인", "아이돌", "배우", "가수",
    "레시피", "요리", "다이어트", "주식", "코인", "소설", "인공지능", "로봇",
];

/// Coarse input categories; everything except technical and unknown bypasses search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Greeting,
    Abusive,
    Offtopic,
    HandoffRequest,
    Technical,
    Unknown,
}

impl InputType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Abusive => "abusive",
            Self::Offtopic => "offtopic",
            Self::HandoffRequest => "handoff_request",
            Self::Technical => "technical",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "greeting" => Some(Self::Greeting),
            "abusive" => Some(Self::Abusive),
            "offtopic" => Some(Self::Offtopic),
            "handoff_request" => Some(Self::HandoffRequest),
            "technical" => Some(Self::Technical),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    #[must_use]
    pub fn bypasses_search(self) -> bool {
        !matches!(self, Self::Technical | Self::Unknown)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputClassification {
    pub input_type: InputType,
    pub reason: String,
    pub matched_words: Vec<String>,
}

/// Where a non-ASCII term may match inside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    Anywhere,
    /// At the start of a word; terms of two characters or fewer must be the whole word.
    WordStart,
}

#[derive(Debug, Clone, Copy)]
struct Lexicon {
    input_type: InputType,
    reason: &'static str,
    terms: &'static [&'static str],
    boundary: Boundary,
}

/// Rule-ordered classifier over static lexicons.
///
/// Rules run as abusive, handoff request, greeting, technical, off-topic; the first lexicon
/// with a hit decides the type, and input matching none is [`InputType::Unknown`].
#[derive(Debug, Clone)]
pub struct InputClassifier {
    rules: [Lexicon; 5],
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InputClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: [
                Lexicon {
                    input_type: InputType::Abusive,
                    reason: "abusive language detected",
                    terms: &ABUSIVE_TERMS,
                    boundary: Boundary::Anywhere,
                },
                Lexicon {
                    input_type: InputType::HandoffRequest,
                    reason: "explicit request for a human counsellor",
                    terms: &HANDOFF_TERMS,
                    boundary: Boundary::Anywhere,
                },
                Lexicon {
                    input_type: InputType::Greeting,
                    reason: "greeting or small talk",
                    terms: &GREETING_TERMS,
                    boundary: Boundary::WordStart,
                },
                Lexicon {
                    input_type: InputType::Technical,
                    reason: "domain vocabulary present",
                    terms: &TECHNICAL_TERMS,
                    boundary: Boundary::Anywhere,
                },
                Lexicon {
                    input_type: InputType::Offtopic,
                    reason: "outside the support domain",
                    terms: &OFFTOPIC_TERMS,
                    boundary: Boundary::Anywhere,
                },
            ],
        }
    }

    #[must_use]
    pub fn classify(&self, text: &str) -> InputClassification {
        let haystack = Haystack::new(text);
        for rule in &self.rules {
            let matched_words = rule
                .terms
                .iter()
                .filter(|term| haystack.matches(term, rule.boundary))
                .map(|term| (*term).to_string())
                .collect::<Vec<_>>();
            if !matched_words.is_empty() {
                return InputClassification {
                    input_type: rule.input_type,
                    reason: rule.reason.to_string(),
                    matched_words,
                };
            }
        }

        InputClassification {
            input_type: InputType::Unknown,
            reason: "no lexicon matched".to_string(),
            matched_words: Vec::new(),
        }
    }
}

/// Canned reply for input types that never reach search.
#[must_use]
pub fn template_for(input_type: InputType, persona_name: &str) -> Option<String> {
    match input_type {
        InputType::Greeting => Some("안녕하세요! 어떻게 도와드릴까요?".to_string()),
        InputType::Abusive => {
            Some("욕설을 하시면 응대를 할 수 없습니다. 30분 후 재문의 바랍니다.".to_string())
        }
        InputType::HandoffRequest => {
            Some("상담사 연결을 도와드리겠습니다. 잠시만 기다려 주세요.".to_string())
        }
        InputType::Offtopic => Some(format!(
            "저는 {persona_name} AI 상담사로 해당 질문은 상담 범위를 벗어나 답변 드릴 수 없습니다."
        )),
        InputType::Technical | InputType::Unknown => None,
    }
}

/// Input text prepared for lexicon lookups.
pub(crate) struct Haystack {
    spaced: String,
    compact: String,
    padded_words: String,
}

impl Haystack {
    pub(crate) fn new(text: &str) -> Self {
        let words = fold(text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            spaced: spaced_lower(text),
            compact: compact_lower(text),
            padded_words: format!(" {words} "),
        }
    }

    // ASCII terms match whole words so "hi" does not fire inside "this".
    pub(crate) fn matches(&self, term: &str, boundary: Boundary) -> bool {
        if term.is_ascii() {
            return self.padded_words.contains(&format!(" {term} "));
        }
        match boundary {
            Boundary::Anywhere => {
                self.spaced.contains(term) || self.compact.contains(&compact_lower(term))
            }
            Boundary::WordStart => {
                let term = spaced_lower(term);
                if term.chars().count() <= 2 {
                    self.padded_words.contains(&format!(" {term} "))
                } else {
                    self.padded_words.contains(&format!(" {term}"))
                }
            }
        }
    }

    pub(crate) fn compact(&self) -> &str {
        &self.compact
    }
}
