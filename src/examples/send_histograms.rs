use histostream::*;
use rand::Rng;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const BINS: usize = 20;
const STEPS: u64 = 10;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.connect("127.0.0.1:50061")?;
    let mut rng = rand::thread_rng();

    let references = [
        reference("/OPAL_2004_S6132243/d01-x01-y01", "1-T", |x| 40.0 * (-8.0 * x).exp()),
        reference("/ALEPH_2004_S5765862/d54-x01-y01", "Jet mass", |x| 12.0 * x * (-4.0 * x).exp()),
    ];

    let epoch = ConfigurationEpoch {
        protocol_version: PROTOCOL_VERSION,
        flags: 0,
        target_event_count: STEPS * 1_000,
        tunables: Some(serde_json::json!({
            "TimeShower:alphaSvalue": {"min": 0.06, "max": 0.25, "default": 0.1365}
        })),
        links: None,
        references: references
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect(),
    };

    let bytes = epoch.encode(LengthPrefix::U16)?;
    sock.send(&bytes)?;
    println!("📤 Configuration: {} histograms, {} bytes", epoch.references.len(), bytes.len());

    for step in 1..=STEPS {
        let events = step * 1_000;
        // The first frame is a quick interpolated estimate.
        let is_interpolated = step == 1;
        let histograms = epoch
            .references
            .values()
            .map(|r| simulate(&r.baseline, events, &mut rng))
            .collect();

        let frame = DataFrame {
            is_interpolated,
            histograms,
        };
        let bytes = frame.encode(LengthPrefix::U16)?;
        sock.send(&bytes)?;
        println!("📤 Data frame {}: {} events, {} bytes", step, events, bytes.len());

        thread::sleep(Duration::from_millis(200));
    }

    Ok(())
}

fn reference(id: &str, title: &str, shape: fn(f64) -> f64) -> ReferenceRecord {
    let width = 1.0 / BINS as f64;
    let bins = (0..BINS)
        .map(|i| {
            let x = (i as f64 + 0.5) * width;
            let y = shape(x);
            BinSample {
                y,
                y_err_plus: 0.05 * y,
                y_err_minus: 0.05 * y,
                x,
                x_err_plus: width / 2.0,
                x_err_minus: width / 2.0,
            }
        })
        .collect();

    ReferenceRecord {
        id: id.to_string(),
        title: title.to_string(),
        short_label: title.to_string(),
        info: ReferenceInfo {
            beam: "ee".to_string(),
            energy: "91.2".to_string(),
            process: "zhad".to_string(),
            params: String::new(),
            shortdesc: title.to_string(),
        },
        images: ImageRefs::default(),
        baseline: HistogramSeries::new(id, bins, 0),
    }
}

/// Reference smeared with statistical noise that shrinks as events accumulate.
fn simulate(reference: &HistogramSeries, events: u64, rng: &mut impl Rng) -> HistogramSeries {
    let rel = 3.0 / (events as f64).sqrt();
    let bins = reference
        .bins
        .iter()
        .map(|b| {
            let y = b.y * (1.0 + rng.gen_range(-rel..rel));
            BinSample {
                y,
                y_err_plus: y * rel,
                y_err_minus: y * rel,
                ..*b
            }
        })
        .collect();
    HistogramSeries::new(reference.id.clone(), bins, events)
}
