use factorep::oracle::FixedMomentOracle;
use factorep::{EPUpdateDriver, FactorRepresentation, MarginalState, MaxPrecisionIndex, Moments, PotentialGroup};

fn main() {
    divan::main();
}

fn chain_factors(n: usize) -> FactorRepresentation {
    let rows = (0..n)
        .map(|i| {
            if i == 0 {
                vec![(0, 1.0)]
            } else {
                vec![(i - 1, 0.5), (i, 1.0)]
            }
        })
        .collect();
    let pi = vec![1.0; n];
    let beta = vec![0.0; n];
    FactorRepresentation::new_univariate(n, rows, pi, beta).unwrap()
}

#[divan::bench(args = [8, 64, 512])]
fn sequential_update_round_robin(bencher: divan::Bencher, n: usize) {
    bencher
        .with_inputs(|| {
            let factors = chain_factors(n);
            let marginals = MarginalState::from_messages(&factors);
            let oracle = FixedMomentOracle::new(PotentialGroup::Univariate)
                .with_default(Moments::Univariate { alpha: 0.0, nu: 0.01 });
            (factors, marginals, oracle)
        })
        .bench_local_refs(|(factors, marginals, oracle)| {
            let mut driver = EPUpdateDriver::univariate(factors, marginals, oracle, 1e-6, None).unwrap();
            for j in 0..n {
                driver.sequential_update(j, 0.5, false).unwrap();
            }
        });
}

#[divan::bench(args = [8, 64, 512])]
fn sequential_update_with_selective_damping_index(bencher: divan::Bencher, n: usize) {
    bencher
        .with_inputs(|| {
            let factors = chain_factors(n);
            let marginals = MarginalState::from_messages(&factors);
            let oracle = FixedMomentOracle::new(PotentialGroup::Univariate)
                .with_default(Moments::Univariate { alpha: 0.0, nu: 0.01 });
            let pi_index = MaxPrecisionIndex::new(n);
            (factors, marginals, oracle, pi_index)
        })
        .bench_local_refs(|(factors, marginals, oracle, pi_index)| {
            let mut driver =
                EPUpdateDriver::univariate(factors, marginals, oracle, 1e-6, Some(pi_index)).unwrap();
            for j in 0..n {
                driver.sequential_update(j, 0.5, false).unwrap();
            }
        });
}

#[divan::bench(args = [8, 64, 512])]
fn max_precision_index_update(bencher: divan::Bencher, n: usize) {
    bencher
        .with_inputs(|| MaxPrecisionIndex::new(n))
        .bench_local_refs(|index| {
            for j in 0..n {
                index.update(j % n, j, (j as f64) * 0.5);
            }
        });
}
