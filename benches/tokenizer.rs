use criterion::{Criterion, criterion_group, criterion_main};
use viola::{RawGrammar, Registry, TextSource, Tokenizer};

const GRAMMAR: &str = r##"{
    "name": "Mini",
    "scopeName": "source.mini",
    "patterns": [
        { "include": "#comment" },
        { "include": "#string" },
        { "match": "\\b\\d+(\\.\\d+)?\\b", "name": "constant.numeric" },
        { "match": "\\b(if|else|while|for|return)\\b", "name": "keyword.control" },
        { "match": "[A-Za-z_]\\w*", "name": "variable.other" }
    ],
    "repository": {
        "comment": { "name": "comment.block", "begin": "/\\*", "end": "\\*/" },
        "string": {
            "name": "string.quoted.double",
            "begin": "\"",
            "end": "\"",
            "patterns": [{ "match": "\\\\.", "name": "constant.character.escape" }]
        }
    }
}"##;

fn criterion_benchmark(c: &mut Criterion) {
    let mut registry = Registry::default();
    registry.add_grammar_from_raw(RawGrammar::load_from_str(GRAMMAR).unwrap());
    let grammar_id = registry.grammar_id("Mini").unwrap();

    let input = r#"if (count > 12) { return "done\n"; } /* trailing
comment spanning lines */ else { total = total + 0.5; }
"#
    .repeat(64);
    let line_count = input.as_str().line_count();

    c.bench_function("tokenize sample", |b| {
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(grammar_id, &registry);
            let outcome = tokenizer.parse_lines(input.as_str(), 0..line_count);
            std::hint::black_box(outcome);
        })
    });

    c.bench_function("retokenize one line", |b| {
        let mut tokenizer = Tokenizer::new(grammar_id, &registry);
        tokenizer.parse_lines(input.as_str(), 0..line_count);
        b.iter(|| {
            tokenizer.apply_edit(40..41, 0);
            let outcome = tokenizer.parse_lines(input.as_str(), 40..41);
            std::hint::black_box(outcome);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
