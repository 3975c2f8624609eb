use light_outlier::anomaly::half_space_tree::{HalfSpaceTree, HalfSpaceTreeConfig};
use light_outlier::anomaly::rs_hash::{RsHash, RsHashConfig};
use light_outlier::anomaly::AnomalyDetector;
use ndarray::{array, Array1};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use std::time::Instant;

const N_SAMPLES: usize = 5_000;
const SPIKES: [usize; 4] = [1_200, 2_500, 3_333, 4_800];

/// Two noisy sines with a few injected spikes.
fn synthetic_stream(seed: u64) -> Vec<Array1<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.05).unwrap();
    (0..N_SAMPLES)
        .map(|t| {
            let phase = t as f64 / 50.0;
            let mut x = array![
                phase.sin() + rng.sample(noise),
                phase.cos() + rng.sample(noise)
            ];
            if SPIKES.contains(&t) {
                x[0] += 4.0;
                x[1] -= 3.0;
            }
            x
        })
        .collect()
}

fn report<D: AnomalyDetector<f64>>(name: &str, mut detector: D, stream: &[Array1<f64>]) {
    let now = Instant::now();
    let mut flagged = Vec::new();
    for (t, x) in stream.iter().enumerate() {
        if let Some(score) = detector.fit_score(x).unwrap() {
            if score > 0.0 {
                flagged.push((t, score));
            }
        }
    }
    let elapsed_time = now.elapsed();
    let hits = SPIKES
        .iter()
        .filter(|spike| flagged.iter().any(|(t, _)| t == *spike))
        .count();

    println!("{}: took {}ms", name, elapsed_time.as_millis());
    println!(
        "{}: {} observations flagged, {}/{} spikes among them",
        name,
        flagged.len(),
        hits,
        SPIKES.len()
    );
    for (t, score) in flagged.iter().take(10) {
        println!("  t={:>5} score={:.3}", t, score);
    }
}

fn main() {
    let stream = synthetic_stream(7);

    // PARAMETERS
    let hst_config = HalfSpaceTreeConfig {
        window_size: 250,
        height: 8,
        n_trees: 25,
        seed: Some(1),
    };
    let rs_hash_config = RsHashConfig {
        init_len: 150,
        decay: 0.015,
        n_components: 100,
        n_hashes: 10,
        seed: Some(1),
    };

    report(
        "half-space trees",
        HalfSpaceTree::new(hst_config).unwrap(),
        &stream,
    );
    report("RS-Hash", RsHash::new(rs_hash_config).unwrap(), &stream);
}
