use std::time::Instant;

use rumornet::identity::{mine, verify};

const ITERATIONS: u32 = 5;

fn main() {
    println!("Benchmarking admission PoW ({ITERATIONS} iterations per difficulty)\n");

    for difficulty in 0..=4u32 {
        let mut total_ms = 0u128;
        let mut last_nonce = 0u64;
        for i in 0..ITERATIONS {
            let node_id = format!("bench-node-{difficulty}-{i}");
            let start = Instant::now();
            let proof = mine(&node_id, difficulty);
            total_ms += start.elapsed().as_millis();
            assert!(verify(&node_id, proof.nonce, difficulty));
            last_nonce = proof.nonce;
        }
        println!(
            "  difficulty {}: avg {:>6} ms (expected ~16^{} attempts, last nonce {})",
            difficulty,
            total_ms / ITERATIONS as u128,
            difficulty,
            last_nonce
        );
    }

    println!("\nEach extra nibble multiplies expected mining work by 16; verification stays O(1).");
}
