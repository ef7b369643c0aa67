use byteorder::{ByteOrder, LittleEndian};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;
use xvdscope::bat::{self, UNALLOCATED};
use xvdscope::hash_tree::tree_size_bytes;
use xvdscope::header::{offsets, MAGIC, XVD_BLOCK_SIZE};
use xvdscope::{ContainerHeader, LayoutResolver, HEADER_SIZE};

fn bench_hash_tree(c: &mut Criterion) {
    c.bench_function("tree_size_64gib", |b| {
        b.iter(|| tree_size_bytes(black_box(16 * 1024 * 1024), false).unwrap())
    });
    c.bench_function("tree_size_max_resilient", |b| {
        b.iter(|| tree_size_bytes(black_box(835_210_000), true).unwrap())
    });
}

/// Dynamic header with a 64 KiB BAT, half of it allocated.
fn dynamic_fixture() -> (ContainerHeader, Vec<u8>) {
    const ENTRIES: u32 = 0x4000;
    let mut raw = vec![0u8; HEADER_SIZE];
    raw[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(MAGIC);
    LittleEndian::write_u32(&mut raw[offsets::FORMAT_VERSION..], 3);
    LittleEndian::write_u32(&mut raw[offsets::CONTAINER_TYPE..], 1);
    LittleEndian::write_u32(&mut raw[offsets::DYNAMIC_HEADER_LENGTH..], ENTRIES * 4);
    LittleEndian::write_u32(&mut raw[offsets::BLOCK_SIZE..], XVD_BLOCK_SIZE);
    LittleEndian::write_u64(&mut raw[offsets::DRIVE_SIZE..], u64::from(ENTRIES) * u64::from(XVD_BLOCK_SIZE));
    let header = ContainerHeader::decode(&raw).unwrap();

    let bat_at = LayoutResolver::new(&header).user_data_region().unwrap().end().unwrap() as usize;
    let mut file = vec![0u8; bat_at];
    for i in 0..ENTRIES {
        let e = if i % 2 == 0 { i } else { UNALLOCATED };
        file.extend_from_slice(&e.to_le_bytes());
    }
    (header, file)
}

fn bench_dynamic_layout(c: &mut Criterion) {
    let (header, file) = dynamic_fixture();
    let bat_offset = LayoutResolver::new(&header).user_data_region().unwrap().end().unwrap();

    c.bench_function("bat_scan_16k_entries", |b| {
        b.iter(|| {
            let mut cur = Cursor::new(black_box(&file));
            bat::scan(&mut cur, bat_offset, u64::from(header.dynamic_header_length)).unwrap()
        })
    });

    c.bench_function("resolve_dynamic", |b| {
        b.iter(|| {
            let mut cur = Cursor::new(black_box(&file));
            LayoutResolver::new(&header).resolve(&mut cur).unwrap()
        })
    });
}

criterion_group!(benches, bench_hash_tree, bench_dynamic_layout);
criterion_main!(benches);
