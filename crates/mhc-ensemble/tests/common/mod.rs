//! Shared fixtures for integration tests.

#![allow(dead_code)]

const RESIDUES: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

/// Deterministic set of `n` 9-mers with affinities in roughly [10, 50000] nM.
pub fn synthetic_dataset(n: usize) -> (Vec<String>, Vec<f64>) {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut peptides = Vec::with_capacity(n);
    let mut affinities = Vec::with_capacity(n);
    for _ in 0..n {
        let mut peptide = String::with_capacity(9);
        let mut hydrophobic = 0usize;
        for _ in 0..9 {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let residue = RESIDUES[((state >> 33) % RESIDUES.len() as u64) as usize];
            if b"AILMFVW".contains(&residue) {
                hydrophobic += 1;
            }
            peptide.push(residue as char);
        }
        peptides.push(peptide);
        affinities.push(10f64 * 5000f64.powf(1.0 - hydrophobic as f64 / 9.0));
    }
    (peptides, affinities)
}

pub const PSEUDOSEQUENCES: [(&str, &str); 3] = [
    ("HLA-A*01:01", "YFAMYQENMAHTDANTLYIIYRDYTWVARVYRGY"),
    ("HLA-A*02:01", "YFAMYGEKVAHTHVDTLYVRYHYYTWAVLAYTWY"),
    ("HLA-B*07:02", "YYSEYRNIYAQTDESNLYLSYDYYTWAERAYEWY"),
];
