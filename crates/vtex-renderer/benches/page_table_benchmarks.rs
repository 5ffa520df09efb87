//! Page Table Benchmarks
//!
//! Throughput of page activation, LRU slot recycling and lookup rebuilds

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{IVec2, UVec2};
use vtex_renderer::{
    LookupTexture, LruCache, PageTable, TileRenderJob, TileRenderStatus, TiledTexture,
    VirtualTextureConfig, VirtualTextureSystem,
};

fn bench_lru_touch(c: &mut Criterion) {
    let mut group = c.benchmark_group("lru_touch");

    for capacity in [64u32, 1024, 16384].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, &capacity| {
            let mut lru = LruCache::new(capacity);
            let mut next = 0u32;

            b.iter(|| {
                // Stride through the cache so every touch relinks a node.
                next = (next + 7919) % capacity;
                lru.touch(black_box(next));
                black_box(lru.oldest())
            });
        });
    }

    group.finish();
}

fn bench_activate_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("activate_page");

    for table_size in [64u32, 256, 1024].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(table_size),
            table_size,
            |b, &table_size| {
                let mut tiles = TiledTexture::new(UVec2::new(8, 8), 128, 4);
                let mut table = PageTable::new(table_size, 4, &mut tiles);
                let mut frame = 0;

                b.iter(|| {
                    frame += 1;
                    table.begin_activation(frame);
                    for y in (0..table_size).step_by(8) {
                        for x in (0..table_size).step_by(8) {
                            black_box(table.activate_page(x, y, 0, &mut tiles));
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_change_view_rect(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_view_rect");

    group.bench_function("scroll_256", |b| {
        let mut tiles = TiledTexture::new(UVec2::new(8, 8), 128, 4);
        let mut table = PageTable::new(256, 4, &mut tiles);

        b.iter(|| black_box(table.change_view_rect(IVec2::new(1, 0), &mut tiles)));
    });

    group.finish();
}

fn bench_streaming_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_frame");

    group.bench_function("update_with_scroll", |b| {
        let mut system = VirtualTextureSystem::new(VirtualTextureConfig::default())
            .expect("default config is valid");
        let mut renderer = |_: &TileRenderJob| TileRenderStatus::Completed;
        let mut step = 0;

        b.iter(|| {
            step += 1;
            for x in 0..16 {
                system.activate_page(x * 16, 64, 4);
            }
            if step % 8 == 0 {
                system.change_view_rect(IVec2::new(16, 0));
            }
            black_box(system.update(&mut renderer))
        });
    });

    group.finish();
}

fn bench_lookup_rasterize(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_rasterize");

    group.bench_function("table_256", |b| {
        let mut tiles = TiledTexture::new(UVec2::new(8, 8), 128, 4);
        let mut table = PageTable::new(256, 64, &mut tiles);
        table.begin_activation(1);
        for i in 0..32 {
            table.activate_page(i * 8, i * 8, (i % 4) as u8, &mut tiles);
        }
        loop {
            let ids = table.requests_mut().update();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                if table.dispatch(id, &mut tiles).is_some() {
                    table.complete(id, &mut tiles);
                }
            }
        }

        let mut draws = Vec::new();
        let mut lookup = LookupTexture::new(256);
        b.iter(|| {
            table.update_lookup(&tiles, &mut draws);
            lookup.rasterize(&draws);
            black_box(lookup.texel(0, 0))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_lru_touch,
    bench_activate_page,
    bench_change_view_rect,
    bench_streaming_frame,
    bench_lookup_rasterize,
);

criterion_main!(benches);
