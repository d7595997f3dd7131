use histostream::*;
use std::net::UdpSocket;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("📊 histostream - Receiver");
    println!("📡 Listening on 127.0.0.1:50061...\n");

    let sock = UdpSocket::bind("127.0.0.1:50061")?;
    let mut buf = vec![0u8; 65536];

    let mut session = SessionController::new(SessionConfig::default());
    session.on_ready(|info| {
        println!(
            "✅ Ready: protocol v{}, target {} events",
            info.protocol_version, info.target_event_count
        );
    });
    session.on_histogram_added(|id, _, reference| {
        println!("   + {} ({})", id, reference.title);
    });
    session.on_histogram_removed(|id, _, _| {
        println!("   - {}", id);
    });
    session.on_metadata_updated(|meta| {
        let kind = if meta.is_interpolated { "interpolated" } else { "simulated" };
        println!("📥 {} events ({})", meta.nevts, kind);
    });

    loop {
        match sock.recv_from(&mut buf) {
            Ok((size, _src)) => {
                if let Err(e) = session.feed_frame(&buf[..size]) {
                    eprintln!("❌ Failed to decode frame: {}", e);
                    continue;
                }
                print_comparison(&session);
            }
            Err(e) => {
                eprintln!("❌ Recv error: {}", e);
            }
        }
    }
}

fn print_comparison(session: &SessionController) {
    if session.store().nevts() == 0 {
        return;
    }
    if let Some(progress) = session.progress() {
        println!("   Progress: {:.0}%", progress * 100.0);
    }
    for id in session.store().ids() {
        match session.compare(id) {
            Some((chi2, err)) => println!("   χ² {:<40} {:8.3} ± {:.3}", id, chi2, err),
            None => println!("   χ² {:<40} cannot compare", id),
        }
    }
    println!();
}
