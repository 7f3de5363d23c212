// User facing entry point: search for the smallest value a
// strategy can produce that satisfies a predicate.

use std::cell::Cell;
use std::env;
use std::fmt::Debug;

use crate::data::{StopTest, TestData};
use crate::engine::{find_interesting_buffer, Settings};
use crate::strategies::Strategy;

lazy_static! {
    // Read once at first use; when set, every candidate's
    // consumed prefix and decoded value get printed.
    static ref DEBUG: bool = env::var("CONJECTURE_DEBUG").map(|v| v == "true").unwrap_or(false);
}

const FIND_SEED: [u32; 2] = [0x5eed, 0x5eed];

#[derive(Debug, Clone)]
pub struct NoSuchExample;

pub fn find<S, P>(strategy: S, check: P) -> Result<S::Value, NoSuchExample>
where
    S: Strategy,
    S::Value: Debug,
    P: Fn(&S::Value) -> bool,
{
    // find searches much harder than a plain runner: failing to
    // find an example here is a user visible answer, not just a
    // failed generation phase.
    find_with(
        strategy,
        check,
        Settings {
            mutations: 200,
            generations: 1000,
            ..Settings::default()
        },
    )
}

pub fn find_with<S, P>(strategy: S, check: P, settings: Settings) -> Result<S::Value, NoSuchExample>
where
    S: Strategy,
    S::Value: Debug,
    P: Fn(&S::Value) -> bool,
{
    let seen = Cell::new(false);
    let buffer = find_interesting_buffer(
        |data: &mut TestData| {
            let value = strategy.draw(data)?;
            if check(&value) {
                seen.set(true);
                if *DEBUG {
                    println!("{:?} -> {:?}", &data.buffer()[..data.index()], value);
                }
                // A flat charge; only costs incurred by the
                // decoders themselves distinguish candidates.
                data.incur_cost(1);
                data.mark_interesting()
            } else {
                if !seen.get() && *DEBUG {
                    println!("{:?} -> {:?}", &data.buffer()[..data.index()], value);
                }
                Ok(())
            }
        },
        settings,
        &FIND_SEED,
    );
    match buffer {
        Some(buffer) => {
            let mut data = TestData::new(buffer);
            match strategy.draw(&mut data) {
                Ok(value) => {
                    assert!(
                        check(&value),
                        "BUG: minimal example no longer satisfies check"
                    );
                    Ok(value)
                }
                Err(StopTest) => panic!("BUG: minimal buffer no longer decodes"),
            }
        }
        None => Err(NoSuchExample),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{booleans, floats, from_fn, just, lists, n_byte_unsigned};
    use std::collections::HashSet;

    fn saturating_sum(xs: &[u64]) -> u64 {
        xs.iter().fold(0u64, |a, &b| a.saturating_add(b))
    }

    #[test]
    fn a_block_of_bytes_simplifies_to_zeros() {
        let result = find(from_fn(|d: &mut TestData| d.draw_bytes(100)), |_| true).unwrap();
        assert_eq!(result, vec![0; 100]);
    }

    #[test]
    fn a_block_of_bytes_simplifies_to_lexicographically_smallest() {
        let result = find(from_fn(|d: &mut TestData| d.draw_bytes(1000)), |v| {
            v.iter().filter(|&&c| c > 0).count() >= 200
        })
        .unwrap();
        let mut expected = vec![0; 800];
        expected.extend_from_slice(&[1; 200]);
        assert_eq!(result, expected);
    }

    #[test]
    fn variable_length_draws_shrink_with_their_length_prefix() {
        let result = find(
            from_fn(|d: &mut TestData| {
                let n = d.draw_bytes(1)?[0];
                d.draw_bytes(usize::from(n))
            }),
            |v| v.iter().any(|&c| c > 0),
        )
        .unwrap();
        assert_eq!(result, vec![1]);
    }

    #[test]
    fn minimum_sum_lists_have_no_slack() {
        let result = find(lists(n_byte_unsigned(8)), |xs| saturating_sum(xs) >= 100).unwrap();
        assert_eq!(saturating_sum(&result), 100);
        assert!(!result.contains(&0));
    }

    #[test]
    fn duplicates_shrink_to_a_pair_of_zeros() {
        let result = find(lists(n_byte_unsigned(8)), |xs| {
            xs.iter().collect::<HashSet<_>>().len() < xs.len()
        })
        .unwrap();
        assert_eq!(result, vec![0, 0]);
    }

    #[test]
    fn minimal_bool_lists_are_false_then_true() {
        let result = find(lists(booleans()), |x| {
            x.iter().any(|&b| b) && !x.iter().all(|&b| b)
        })
        .unwrap();
        assert_eq!(result, vec![false, true]);
    }

    #[test]
    fn small_positive_integers_shrink_to_one() {
        let result = find(n_byte_unsigned(8), |&x| x > 0 && x <= 100).unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn large_integers_shrink_to_the_boundary() {
        let result = find(n_byte_unsigned(8), |&x| x >= u64::max_value() - 99).unwrap();
        assert_eq!(result, u64::max_value() - 99);
    }

    #[test]
    fn the_minimal_non_finite_float_is_infinity() {
        let result = find(floats(), |x| !x.is_finite()).unwrap();
        assert_eq!(result, std::f64::INFINITY);
    }

    #[test]
    fn the_minimal_float_in_a_range_is_its_low_end() {
        let result = find(floats(), |&x| 1.0 <= x && x <= 1000.0).unwrap();
        assert_eq!(result, 1.0);
    }

    #[test]
    fn containment_shrinks_both_sides_together() {
        let result = find(
            (lists(n_byte_unsigned(8)), n_byte_unsigned(8)),
            |t: &(Vec<u64>, u64)| t.0.contains(&t.1) && t.1 >= 100,
        )
        .unwrap();
        assert_eq!(result, (vec![100], 100));
    }

    #[test]
    fn unsatisfiable_filters_do_not_loop() {
        assert!(find(just(false).filter(|&b| b), |_| true).is_err());
    }
}
