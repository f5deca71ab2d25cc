use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use connpool::{Options, Pool};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_pool(c: &mut Criterion) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let _held: Vec<_> = listener.incoming().flatten().collect();
    });

    let pool = Arc::new(Pool::new(Options::default(), move || TcpStream::connect(addr)).unwrap());

    c.bench_function("get_put", |b| {
        b.iter(|| {
            let conn = pool.get().unwrap();
            pool.put(conn);
        })
    });

    c.bench_function("get_put_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let conn = pool.get().unwrap();
                            pool.put(conn);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_pool);
criterion_main!(benches);
