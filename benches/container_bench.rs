use criterion::{black_box, criterion_group, criterion_main, Criterion};
use evc::{Container, ContainerOptions, UploadSource};
use std::io::{Cursor, Write};

fn bench_member_write(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("member_1mb_zstd", |b| {
        b.iter(|| {
            let container =
                Container::from_writer(Box::new(Vec::new()), ContainerOptions::default())
                    .unwrap();
            let mut member = container.create("bench.bin", None).unwrap();
            member.write_all(black_box(&data)).unwrap();
            member.close().unwrap();
            container.close().unwrap();
        })
    });

    c.bench_function("member_1mb_store", |b| {
        b.iter(|| {
            let container = Container::from_writer(
                Box::new(Vec::new()),
                ContainerOptions { level: 0, password: None },
            )
            .unwrap();
            let mut member = container.create("bench.bin", None).unwrap();
            member.write_all(black_box(&data)).unwrap();
            member.close().unwrap();
            container.close().unwrap();
        })
    });
}

fn bench_upload_stream(c: &mut Criterion) {
    let data = vec![7u8; 4 * 1024 * 1024];

    c.bench_function("upload_4mb_hashed", |b| {
        b.iter(|| {
            let container =
                Container::from_writer(Box::new(Vec::new()), ContainerOptions::default())
                    .unwrap();
            let mut source = Cursor::new(data.clone());
            container
                .upload("bench/upload.bin", None, UploadSource::Stream(&mut source))
                .unwrap();
            container.close().unwrap();
        })
    });
}

criterion_group!(benches, bench_member_write, bench_upload_stream);
criterion_main!(benches);
