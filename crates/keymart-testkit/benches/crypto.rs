use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use keymart_core::{
    BuyTerms, ChannelId, KeyBox, KeyId, Keypair, PayloadSerializer, ReceiveSecret,
    SealedKeyEnvelope, Terms,
};
use keymart_testkit::Tick;

fn bench_keybox(c: &mut Criterion) {
    let mut group = c.benchmark_group("keybox");
    let key = KeyBox::generate();

    for size in [64, 1024, 16384].iter() {
        let plaintext = vec![0x5au8; *size];
        let ciphertext = key.encrypt(&plaintext).unwrap();
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, pt| {
            b.iter(|| black_box(key.encrypt(black_box(pt)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decrypt", size), &ciphertext, |b, ct| {
            b.iter(|| black_box(key.decrypt(black_box(ct)).unwrap()));
        });
    }

    group.finish();
}

fn bench_wrap_tick(c: &mut Criterion) {
    let key = KeyBox::generate();
    let tick = Tick {
        symbol: "KMT".into(),
        price: 10_042,
        volume: 1_500,
        at: 1_700_000_000_000,
        venues: vec!["xnas".into(), "arcx".into()],
    };

    c.bench_function("wrap_tick", |b| {
        b.iter(|| {
            let plaintext = PayloadSerializer::Cbor.encode(black_box(&tick)).unwrap();
            black_box(key.encrypt(&plaintext).unwrap())
        });
    });
}

fn bench_sealed_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("sealed_envelope");
    let key = KeyBox::generate();
    let recipient = ReceiveSecret::generate();
    let public = recipient.public_key();
    let envelope = SealedKeyEnvelope::seal(key.material(), &public).unwrap();

    group.bench_function("seal", |b| {
        b.iter(|| black_box(SealedKeyEnvelope::seal(key.material(), black_box(&public)).unwrap()));
    });
    group.bench_function("open", |b| {
        b.iter(|| black_box(envelope.open(black_box(&recipient)).unwrap()));
    });

    group.finish();
}

fn bench_buy_terms(c: &mut Criterion) {
    let mut group = c.benchmark_group("buy_terms");
    let keypair = Keypair::generate();
    let terms = BuyTerms {
        channel_id: ChannelId::random(),
        sequence: 42,
        buyer_pubkey: ReceiveSecret::generate().public_key(),
        key_id: KeyId::random(),
        amount: 35,
        balance: 965,
    };
    let signature = terms.sign(&keypair).unwrap();
    let public = keypair.public_key();

    group.bench_function("sign", |b| {
        b.iter(|| black_box(terms.sign(black_box(&keypair)).unwrap()));
    });
    group.bench_function("verify", |b| {
        b.iter(|| black_box(terms.verify(&public, black_box(&signature))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_keybox,
    bench_wrap_tick,
    bench_sealed_envelope,
    bench_buy_terms
);
criterion_main!(benches);
