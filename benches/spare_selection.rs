//! Benchmark for spare selection
//!
//! Ranking is linear in the pool size; a full drive array tops out at a few
//! thousand unconsumed drives.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use drive_sparing_engine::domain::types::{DesiredSpareProfile, DriveLocation};
use drive_sparing_engine::sparing::selection::{select_best, SelectionCriteria};
use drive_sparing_engine::{
    ArrayPorts, CandidateDriveProfile, DriveType, InMemoryArray, ManualClock, SparingConfig,
    SparingEngine,
};

const DRIVE_TYPES: [DriveType; 4] = [
    DriveType::Sas,
    DriveType::SasNl,
    DriveType::SasFlashHe,
    DriveType::SasFlashMe,
];

fn desired() -> DesiredSpareProfile {
    DesiredSpareProfile {
        original_object_id: Some(0x100),
        drive_type: DriveType::Sas,
        capacity_required: 1000,
        exported_offset: 0x10000,
        block_size: 520,
        location: DriveLocation::new(0, 0, 3),
    }
}

fn pool(size: u32) -> Vec<CandidateDriveProfile> {
    (0..size)
        .map(|i| {
            let mut drive = InMemoryArray::drive(
                0x1000 + i,
                DRIVE_TYPES[(i % 4) as usize],
                1000 + u64::from(i % 97) * 10,
            );
            drive.location = DriveLocation::new(i % 2, i % 8, i % 25);
            drive
        })
        .collect()
}

fn bench_select_best(c: &mut Criterion) {
    let mut group = c.benchmark_group("spare_selection");
    let criteria = SelectionCriteria::new(desired()).unwrap();

    for size in [16u32, 256, 4096] {
        let candidates = pool(size);
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::new("select_best", size), &candidates, |b, pool| {
            b.iter(|| select_best(black_box(&criteria), black_box(pool)));
        });
    }

    group.finish();
}

fn bench_find_best_suitable_spare(c: &mut Criterion) {
    let mut group = c.benchmark_group("spare_selection");
    group.throughput(Throughput::Elements(1));

    let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
    for drive in pool(256) {
        array.add_spare(drive);
    }
    let engine = SparingEngine::new(
        SparingConfig::default(),
        ArrayPorts::from_shared(array),
        ManualClock::new(),
    )
    .unwrap();
    let desired = desired();

    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("find_best_suitable_spare_256", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = engine
                    .find_best_suitable_spare(black_box(0x10c), &desired)
                    .await;
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_select_best, bench_find_best_suitable_spare);
criterion_main!(benches);
