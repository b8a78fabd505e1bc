use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pgrag::rag::{approximate_tokens, Chunker, EntityExtractor};

fn sample_document(paragraphs: usize) -> String {
    let paragraph = "Alice from Acme Corp met Bob in Paris during Q3 2025. \
        The Integrity program at 11 covered Technology, Community and Career topics. \
        Carol presented the Product roadmap while @dave shared #growth tips.";
    vec![paragraph; paragraphs].join("\n\n")
}

fn bench_chunking(c: &mut Criterion) {
    let doc = sample_document(200);
    let chunker = Chunker::default();

    c.bench_function("chunk_200_paragraphs", |b| {
        b.iter(|| chunker.chunk(black_box("doc-bench"), black_box(&doc)))
    });

    c.bench_function("approximate_tokens", |b| {
        b.iter(|| approximate_tokens(black_box(&doc)))
    });
}

fn bench_entity_extraction(c: &mut Criterion) {
    let doc = sample_document(50);
    let chunker = Chunker::default();
    let extractor = EntityExtractor::new();
    let chunks = chunker.chunk("doc-bench", &doc);

    c.bench_function("extract_entities_per_chunk", |b| {
        b.iter(|| {
            for chunk in &chunks {
                black_box(extractor.extract(chunk));
            }
        })
    });

    c.bench_function("extract_keywords_short_query", |b| {
        b.iter(|| {
            extractor.extract_keywords(black_box(
                "What is the Integrity at 11? now: 2025 year, 4th month, 15st day",
            ))
        })
    });
}

criterion_group!(benches, bench_chunking, bench_entity_extraction);
criterion_main!(benches);
