use strata_chunks::{chunk_count, fingerprint, fingerprint_chunks, reassemble, split};

fn make_data(size: usize) -> Vec<u8> {
    // Semi-realistic data: repeating pattern with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

const CHUNK: usize = 1024 * 1024;

#[divan::bench(args = [1048576, 10485760, 41943040])]
fn blake3_whole(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| fingerprint(divan::black_box(&data)));
}

#[divan::bench(args = [1048576, 10485760, 41943040])]
fn blake3_per_chunk_parallel(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let chunks = split(data.len(), CHUNK);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| fingerprint_chunks(divan::black_box(&data), &chunks));
}

#[divan::bench(args = [1048576, 10485760, 41943040])]
fn split_and_reassemble(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let parts = split(data.len(), CHUNK)
                .iter()
                .map(|c| (c.index, c.slice(&data).to_vec()))
                .collect();
            reassemble(chunk_count(data.len(), CHUNK) as u32, parts).unwrap()
        });
}

fn main() {
    divan::main();
}
