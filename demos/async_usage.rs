//! Async usage with tokio

use connpool::{Options, Pool};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== connpool - Async Examples ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        // Hold accepted sockets open for the lifetime of the demo.
        let _held: Vec<_> = listener.incoming().flatten().collect();
    });

    let opts = Options::new()
        .with_max_cap(4)
        .with_idle_timeout(Duration::from_millis(200))
        .with_reap_interval(Duration::from_millis(50));
    let pool = Arc::new(Pool::new(opts, move || TcpStream::connect(addr)).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let conn = pool.get_async().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                println!("   task {} returned: {}", i, pool.put(conn));
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    println!("   Idle after tasks: {}", pool.len());

    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("   Idle after reaping: {}", pool.len());
    println!("   Reaped: {}", pool.metrics().reaped);

    pool.close_async().await.unwrap();
}
