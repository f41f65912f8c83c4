use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mpdist::{buffers::PacketPool, memory::SharedMemoryRegion, ringbuf::RingQueue};
use std::{sync::Arc, thread};

fn pool(capacity: usize) -> PacketPool {
    let size = PacketPool::required_size(capacity, 64).unwrap();
    let region = Arc::new(SharedMemoryRegion::anonymous("bench_pool", size).unwrap());
    PacketPool::create(region, capacity, 64, 0).unwrap()
}

fn ring(capacity: usize) -> RingQueue {
    let size = RingQueue::required_size(capacity).unwrap();
    let region = Arc::new(SharedMemoryRegion::anonymous("bench_ring", size).unwrap());
    RingQueue::create(region, capacity).unwrap()
}

fn benchmark_single_threaded_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("RingQueue_SingleThreaded");

    for capacity in [128, 1024, 4096].iter() {
        group.throughput(Throughput::Elements(*capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_dequeue", capacity),
            capacity,
            |b, &capacity| {
                let pool = pool(capacity);
                let ring = ring(capacity);
                let mut held: Vec<_> = (0..capacity).map(|_| pool.allocate().unwrap()).collect();

                b.iter(|| {
                    for buf in held.drain(..) {
                        ring.enqueue(buf).unwrap();
                    }
                    while let Some(buf) = ring.dequeue() {
                        held.push(buf);
                    }
                });

                for buf in held {
                    pool.release(buf).unwrap();
                }
            },
        );
    }

    group.finish();
}

fn benchmark_bulk_vs_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("RingQueue_Burst32");
    let capacity = 1024;

    group.throughput(Throughput::Elements(32));
    group.bench_function("bulk", |b| {
        let pool = pool(capacity);
        let ring = ring(capacity);
        let mut held: Vec<_> = (0..32).map(|_| pool.allocate().unwrap()).collect();

        b.iter(|| {
            ring.enqueue_bulk(std::mem::take(&mut held)).unwrap();
            ring.dequeue_burst(&mut held, 32);
        });

        for buf in held {
            pool.release(buf).unwrap();
        }
    });

    group.bench_function("single", |b| {
        let pool = pool(capacity);
        let ring = ring(capacity);
        let mut held: Vec<_> = (0..32).map(|_| pool.allocate().unwrap()).collect();

        b.iter(|| {
            for buf in held.drain(..) {
                ring.enqueue(buf).unwrap();
            }
            while let Some(buf) = ring.dequeue() {
                held.push(buf);
            }
        });

        for buf in held {
            pool.release(buf).unwrap();
        }
    });

    group.finish();
}

fn benchmark_pool_cycle(c: &mut Criterion) {
    let pool = pool(4096);

    c.bench_function("PacketPool_allocate_release", |b| {
        b.iter(|| {
            let buf = pool.allocate().unwrap();
            pool.release(buf).unwrap();
        });
    });
}

fn benchmark_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("RingQueue_CrossThread");
    let messages = 10_000u64;
    group.throughput(Throughput::Elements(messages));

    group.bench_function("producer_consumer", |b| {
        b.iter(|| {
            let pool = pool(512);
            let producer_ring = ring(128);
            let consumer_ring = producer_ring.clone();
            let consumer_pool = pool.clone();

            let consumer = thread::spawn(move || {
                let mut received = 0;
                let mut burst = Vec::with_capacity(32);
                while received < messages {
                    if consumer_ring.dequeue_burst(&mut burst, 32) == 0 {
                        std::hint::spin_loop();
                    }
                    for buf in burst.drain(..) {
                        consumer_pool.release(buf).unwrap();
                        received += 1;
                    }
                }
            });

            for _ in 0..messages {
                let mut item = loop {
                    if let Some(buf) = pool.allocate() {
                        break buf;
                    }
                    std::hint::spin_loop();
                };
                while let Err(back) = producer_ring.enqueue(item) {
                    item = back;
                    std::hint::spin_loop();
                }
            }
            consumer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_threaded_throughput,
    benchmark_bulk_vs_single,
    benchmark_pool_cycle,
    benchmark_cross_thread
);
criterion_main!(benches);
