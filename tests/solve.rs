use cyclepow::{GraphSolverBuilder, Scheme, PROOF_SIZE};
use rand::{Rng, SeedableRng};

fn keys(seed: u64, count: usize) -> Vec<[u8; 32]> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen()).collect()
}

fn solve_many(scheme: Scheme, edge_bits: u8, keys: &[[u8; 32]], want: usize) -> usize {
    let solver = GraphSolverBuilder::default()
        .scheme(scheme)
        .edge_bits(edge_bits)
        .threads(4)
        .build()
        .expect("builder fields set");
    let mut found = 0;
    for key in keys {
        let Some(proof) = solver.solve(key).expect("valid solver") else {
            continue;
        };
        assert_eq!(proof.len(), PROOF_SIZE);
        assert!(proof.windows(2).all(|w| w[0] < w[1]));
        assert!(proof.iter().all(|&n| u64::from(n) < 1 << edge_bits));
        assert_eq!(scheme.verify(key, &proof, edge_bits), Ok(()));
        found += 1;
        if found == want {
            break;
        }
    }
    found
}

#[test]
fn lean_solver_finds_verifiable_cycles() {
    // roughly one graph in 42 carries a 42-cycle
    let found = solve_many(Scheme::Lean, 16, &keys(1, 400), 2);
    assert!(found >= 1, "no cycle in 400 graphs");
}

#[test]
fn mean_solver_finds_verifiable_cycles() {
    let found = solve_many(Scheme::Mean, 16, &keys(2, 400), 1);
    assert!(found >= 1, "no cycle in 400 graphs");
}

#[test]
fn directed_solver_finds_verifiable_cycles() {
    // half as many nodes as edges: directed 42-cycles are plentiful
    let found = solve_many(Scheme::Directed, 12, &keys(3, 8), 3);
    assert_eq!(found, 3);
}

#[test]
fn solutions_do_not_depend_on_thread_count() {
    for key in keys(4, 6) {
        for scheme in [Scheme::Lean, Scheme::Mean, Scheme::Directed] {
            let solve = |threads| {
                GraphSolverBuilder::default()
                    .scheme(scheme)
                    .edge_bits(15)
                    .threads(threads)
                    .build()
                    .expect("builder fields set")
                    .solve(&key)
                    .expect("valid solver")
            };
            assert_eq!(solve(1), solve(7));
        }
    }
}

#[test]
fn tampered_proofs_fail() {
    let keys = keys(5, 400);
    let solver = GraphSolverBuilder::default()
        .scheme(Scheme::Lean)
        .edge_bits(16)
        .build()
        .expect("builder fields set");
    let (key, proof) = keys
        .iter()
        .find_map(|k| solver.solve(k).expect("valid solver").map(|p| (*k, p)))
        .expect("a 42-cycle among 400 graphs");
    let mut bumped = proof;
    bumped[PROOF_SIZE - 1] = bumped[PROOF_SIZE - 1].wrapping_add(1) & 0xffff;
    assert!(Scheme::Lean.verify(&key, &bumped, 16).is_err());
    let mut other = key;
    other[0] ^= 1;
    assert!(Scheme::Lean.verify(&other, &proof, 16).is_err());
}
