//! Bootstrap knowledge items and context patterns for a fresh deployment.

use crate::NewKnowledgeItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPattern {
    pub pattern: &'static str,
    pub context: &'static str,
    pub description: &'static str,
    pub priority: u32,
}

const TECHNICAL_PATTERNS: [&str; 20] = [
    "법인결재",
    "법인결재란",
    "포스 설치",
    "포스 설정",
    "프린터 오류",
    "키오스크 설정",
    "카드리더기",
    "영수증 출력",
    "바코드 스캔",
    "QR코드",
    "프로그램 설치",
    "소프트웨어 업데이트",
    "하드웨어 문제",
    "드라이버 설치",
    "재설치",
    "백업",
    "복구",
    "오류 해결",
    "문제 해결",
    "시스템 설정",
];

fn item(question: &str, answer: &str, keywords: &[&str]) -> NewKnowledgeItem {
    NewKnowledgeItem {
        question: question.to_string(),
        answer: answer.to_string(),
        keywords: keywords.iter().map(ToString::to_string).collect(),
        category: "technical".to_string(),
    }
}

#[must_use]
pub fn default_knowledge_items() -> Vec<NewKnowledgeItem> {
    vec![
        item(
            "법인결재란이 안보이는데 없어진건가요?",
            "법인결재란은 현재 시스템에서 정상적으로 제공되고 있습니다. 만약 화면에서 보이지 않는다면 다음을 확인해주세요:\n\n1. 로그인 권한 확인\n2. 메뉴 설정에서 '법인결재' 활성화\n3. 브라우저 새로고침\n4. 캐시 삭제 후 재접속\n\n여전히 문제가 있다면 고객센터로 문의해주세요.",
            &["법인결재", "결재", "메뉴", "화면", "보이지 않음"],
        ),
        item(
            "포스 설치 방법",
            "포스 설치는 smart.arumnet.com에서 진행하세요.\n\n설치 과정:\n1. smart.arumnet.com 접속\n2. 포스 프로그램 다운로드\n3. 설치 파일 실행\n4. 라이선스 키 입력\n5. 설정 완료\n\n설치 중 문제가 있으면 고객센터로 연락주세요.",
            &["포스", "설치", "smart.arumnet.com", "다운로드"],
        ),
        item(
            "프린터 오류 해결",
            "프린터 오류 해결 방법:\n\n1. 프린터 전원 확인\n2. USB 케이블 연결 상태 확인\n3. 프린터 드라이버 재설치\n4. 프린터 큐 초기화\n5. 포스 프로그램 재시작\n\n위 방법으로도 해결되지 않으면 고객센터로 문의해주세요.",
            &["프린터", "오류", "해결", "드라이버", "재설치"],
        ),
    ]
}

#[must_use]
pub fn default_context_patterns() -> Vec<SeedPattern> {
    TECHNICAL_PATTERNS
        .iter()
        .map(|pattern| SeedPattern { pattern, context: "technical", description: "", priority: 1 })
        .collect()
}

/// Description used when a seed pattern does not carry its own.
#[must_use]
pub fn describe(pattern: &SeedPattern) -> String {
    if pattern.description.is_empty() {
        format!("{} 관련 질문", pattern.pattern)
    } else {
        pattern.description.to_string()
    }
}
