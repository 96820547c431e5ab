use criterion::{black_box, criterion_group, criterion_main, Criterion};
use octoasm::Compiler;

static SCROLLER: &str = "\
:macro row n { :byte { n & 0xFF } :byte { ( n >> 8 ) & 0xFF } }
:stringmode nibble \"0123456789ABCDEF\" { :byte VALUE }

: main
  va := 0
  vb := 8
  loop
    while va != 64
    sprite va vb 8
    va += 8
  again
  jump done

: done
  ;

: table
  row 0x1234 row 0x5678 row 0x9ABC
  nibble \"0123456789ABCDEF\"
";

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("assemble scroller", |b| {
        b.iter(|| {
            let mut compiler = Compiler::new();
            compiler.compile_source("bench.8o", black_box(SCROLLER));
            black_box(compiler.code().len())
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
