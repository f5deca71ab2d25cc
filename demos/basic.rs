//! Basic usage examples for Pool

use connpool::{MetricsExporter, Options, Pool};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== connpool - Basic Examples ===\n");

    let addr = spawn_echo_server();

    // Example 1: Simple pool
    simple_pool(addr);

    // Example 2: Capacity limits
    capacity(addr);

    // Example 3: Metrics
    metrics(addr);
}

fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind echo server");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            thread::spawn(move || {
                let mut buf = [0u8; 512];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn simple_pool(addr: std::net::SocketAddr) {
    println!("1. Simple Pool:");
    let pool = Pool::new(Options::new().with_initial_size(2), move || TcpStream::connect(addr)).unwrap();
    println!("   Idle after warm-up: {}", pool.len());

    let mut conn = pool.get().unwrap();
    conn.write_all(b"ping").unwrap();
    let mut reply = [0u8; 4];
    conn.read_exact(&mut reply).unwrap();
    println!("   Echoed: {}", String::from_utf8_lossy(&reply));

    pool.put(conn);
    println!("   Idle after return: {}\n", pool.len());
}

fn capacity(addr: std::net::SocketAddr) {
    println!("2. Capacity Limits:");
    let pool = Pool::new(Options::new().with_max_cap(2), move || TcpStream::connect(addr)).unwrap();

    let conns: Vec<_> = (0..3).map(|_| pool.get().unwrap()).collect();
    for (i, conn) in conns.into_iter().enumerate() {
        println!("   put #{} accepted: {}", i + 1, pool.put(conn));
    }
    println!("   Idle: {}\n", pool.len());
}

fn metrics(addr: std::net::SocketAddr) {
    println!("3. Metrics:");
    let pool = Pool::new(Options::default(), move || TcpStream::connect(addr)).unwrap();

    for _ in 0..5 {
        let conn = pool.get().unwrap();
        pool.put(conn);
    }

    let metrics = pool.metrics();
    println!("   Hit ratio: {:.1}%", metrics.hit_ratio() * 100.0);
    print!("{}", MetricsExporter::export_prometheus(&metrics, "echo", None));
}
