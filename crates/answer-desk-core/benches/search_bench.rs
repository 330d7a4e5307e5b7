use std::sync::Arc;

use answer_desk_core::{
    resolve_context, seed, ContextPattern, EngineConfig, KnowledgeStore, MemoryStore,
    NewKnowledgeItem, SearchService,
};
use criterion::{criterion_group, criterion_main, Criterion};
use time::OffsetDateTime;

const DEVICES: [&str; 5] = ["포스", "프린터", "키오스크", "카드리더기", "바코드 스캐너"];
const TOPICS: [&str; 4] = ["설치 방법", "오류 해결", "설정 변경", "업데이트 안내"];

fn mk_item(index: usize) -> NewKnowledgeItem {
    let device = DEVICES[index % DEVICES.len()];
    let topic = TOPICS[(index / DEVICES.len()) % TOPICS.len()];
    NewKnowledgeItem {
        question: format!("{device} {topic} {index}"),
        answer: format!("{device} {topic} 안내입니다. 1. 전원 확인 2. 재시작 3. 고객센터 문의"),
        keywords: vec![device.to_string(), topic.to_string()],
        category: if index % 3 == 0 { "billing" } else { "technical" }.to_string(),
    }
}

fn bench_search(c: &mut Criterion) {
    let store = MemoryStore::new();
    for index in 0..1_000 {
        if let Err(err) = store.insert(mk_item(index)) {
            panic!("benchmark fixture insert failed: {err}");
        }
    }
    let service = SearchService::new(Arc::new(store), EngineConfig::default());

    c.bench_function("search_1000_items", |b| {
        b.iter(|| {
            if let Err(err) = service.search("프린터 오류 해결", Some("technical"), 5) {
                panic!("search benchmark failed: {err}");
            }
        });
    });
}

fn bench_context(c: &mut Criterion) {
    let patterns = seed::default_context_patterns()
        .iter()
        .filter_map(|pattern| {
            ContextPattern::new(
                pattern.pattern,
                pattern.context,
                &seed::describe(pattern),
                pattern.priority,
                OffsetDateTime::UNIX_EPOCH,
            )
            .ok()
        })
        .collect::<Vec<_>>();

    c.bench_function("resolve_context_seed_patterns", |b| {
        b.iter(|| resolve_context("키오스크 설정 변경 후 영수증 출력이 안돼요", &patterns));
    });
}

criterion_group!(search_benches, bench_search, bench_context);
criterion_main!(search_benches);
