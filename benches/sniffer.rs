use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use instrument_harvester::detect::DelimitedSniffer;

fn table_with_preamble(preamble_lines: usize, rows: usize) -> String {
    let mut out: String = (0..preamble_lines)
        .map(|i| format!("meta{}\n", " x".repeat(i % 5)))
        .collect();
    out.push_str("time,voltage,current\n");
    for i in 0..rows {
        out.push_str(&format!("{i},{:.3},{:.2}\n", 3.0 + i as f64 * 0.001, 0.5 - i as f64 * 0.01));
    }
    out
}

fn bench_sniff(c: &mut Criterion) {
    let sniffer = DelimitedSniffer::default();
    let mut group = c.benchmark_group("sniff");
    for preamble in [0usize, 50, 400] {
        let text = table_with_preamble(preamble, 200);
        group.bench_with_input(BenchmarkId::from_parameter(preamble), &text, |b, text| {
            b.iter(|| sniffer.sniff(black_box(text)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sniff);
criterion_main!(benches);
