// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities: workloads checked against a mirror array, and monitors run after every access.

use std::sync::Once;
static INIT: Once = Once::new();
use crate::{
    config::OramConfig,
    path_oram::PathOram,
    position::bucket_count,
    server::{CountAccessesServer, ServerCall, StorageServer},
    tree::OramTree,
    BlockId, Operation, Oram,
};
use duplicate::duplicate_item;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use simplelog::{Config, WriteLogger};

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

pub(crate) trait Testable {
    fn test_hook(&self) {}
}

#[duplicate_item(
    server_type;
    [OramTree];
    [CountAccessesServer<OramTree>];
)]
impl Testable for server_type {
    fn test_hook(&self) {
        let buckets = self.buckets();
        assert_eq!(buckets.len(), bucket_count(self.height()).unwrap());

        let envelope_size = buckets[0].envelopes()[0].len();
        for bucket in buckets {
            assert_eq!(bucket.len(), self.bucket_size());
            for envelope in bucket.envelopes() {
                assert_eq!(envelope.len(), envelope_size);
            }
        }
    }
}

impl<S: StorageServer + Testable> Testable for PathOram<S> {
    fn test_hook(&self) {
        self.assert_path_invariant();
        for server in self.level_servers() {
            server.test_hook();
        }
    }
}

type MonitoredOram = PathOram<CountAccessesServer<OramTree>>;

/// Performs one access and checks that every level issued exactly one path read followed by
/// `L + 1` bucket writes of `Z` envelopes, deepest first.
pub(crate) fn monitored_access(
    oram: &mut MonitoredOram,
    operation: Operation<'_>,
    id: BlockId,
    rng: &mut StdRng,
) -> Option<Vec<u8>> {
    let before: Vec<usize> = oram
        .level_servers()
        .iter()
        .map(|server| server.transcript().len())
        .collect();

    let result = oram.access(operation, id, rng).unwrap();

    for (server, start) in oram.level_servers().into_iter().zip(before) {
        let calls = &server.transcript()[start..];
        let height = server.height();
        let bucket_size = server.bucket_size();
        let path_length = usize::try_from(height).unwrap() + 1;

        assert_eq!(calls.len(), path_length + 1);
        assert!(matches!(
            calls[0],
            ServerCall::ReadPath { envelopes, .. } if envelopes == bucket_size * path_length
        ));
        for (call, expected_depth) in calls[1..].iter().zip((0..=height).rev()) {
            assert!(matches!(
                call,
                ServerCall::WriteBucket { depth, envelopes, .. }
                    if *depth == expected_depth && *envelopes == bucket_size
            ));
        }
    }

    oram.test_hook();
    result
}

fn random_payload(max_len: usize, rng: &mut StdRng) -> Vec<u8> {
    let mut payload = vec![0u8; rng.gen_range(0..=max_len)];
    rng.fill_bytes(&mut payload);
    payload
}

/// Tests the correctness of `PathOram` on a workload of random reads and writes.
pub(crate) fn test_correctness_random_workload(config: &OramConfig, num_operations: u32) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let mut oram = MonitoredOram::new(config, &mut rng).unwrap();
    let capacity = oram.block_capacity().unwrap();
    let mut mirror_array: Vec<Option<Vec<u8>>> = vec![None; usize::try_from(capacity).unwrap()];

    for _ in 0..num_operations {
        let id = rng.gen_range(0..capacity);
        let index = usize::try_from(id).unwrap();

        if rng.gen::<bool>() {
            let result = monitored_access(&mut oram, Operation::Read, id, &mut rng);
            assert_eq!(result, mirror_array[index]);
        } else {
            let payload = random_payload(config.block_payload_size, &mut rng);
            let result = monitored_access(&mut oram, Operation::Write(&payload), id, &mut rng);
            assert_eq!(result, mirror_array[index]);
            mirror_array[index] = Some(payload);
        }
    }

    for (id, expected) in (0..capacity).zip(&mirror_array) {
        assert_eq!(&oram.read(id, &mut rng).unwrap(), expected, "{id}");
    }

    oram.test_hook();
}

/// Tests the correctness of `PathOram` on repeated passes of sequential accesses 0, 1, ..., `capacity`.
pub(crate) fn test_correctness_linear_workload(config: &OramConfig, num_operations: u32) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let mut oram = MonitoredOram::new(config, &mut rng).unwrap();
    let capacity = oram.block_capacity().unwrap();
    let mut mirror_array: Vec<Option<Vec<u8>>> = vec![None; usize::try_from(capacity).unwrap()];

    let num_passes = u64::from(num_operations) / capacity;

    for _ in 0..num_passes {
        for (id, mirror) in (0..capacity).zip(mirror_array.iter_mut()) {
            if rng.gen::<bool>() {
                let result = monitored_access(&mut oram, Operation::Read, id, &mut rng);
                assert_eq!(&result, mirror);
            } else {
                let payload = random_payload(config.block_payload_size, &mut rng);
                let result = monitored_access(&mut oram, Operation::Write(&payload), id, &mut rng);
                assert_eq!(&result, mirror);
                *mirror = Some(payload);
            }
        }
    }

    for (id, expected) in (0..capacity).zip(&mirror_array) {
        assert_eq!(&oram.read(id, &mut rng).unwrap(), expected, "{id}");
    }

    oram.test_hook();
}

macro_rules! create_correctness_test {
    ($function_name:ident, $height:expr, $bucket_size:expr, $positions_per_block:expr, $recursion_levels:expr, $payload_size:expr, $iterations_to_test:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $height _ $bucket_size _ $positions_per_block _ $recursion_levels _ $payload_size _ $iterations_to_test>]() {
                let config = crate::config::OramConfig {
                    tree_height: $height,
                    bucket_size: $bucket_size,
                    position_compression_factor: $positions_per_block,
                    recursion_levels: Some($recursion_levels),
                    block_payload_size: $payload_size,
                    ..crate::config::OramConfig::default()
                };
                $function_name(&config, $iterations_to_test);
            }
        }
    };
}

/// Stamps out linear and random workload tests for one parameter set:
/// tree height, bucket size, positions per block, recursion levels, payload size.
macro_rules! create_correctness_tests {
    ($height:expr, $bucket_size:expr, $positions_per_block:expr, $recursion_levels:expr, $payload_size:expr) => {
        create_correctness_test!(
            test_correctness_linear_workload,
            $height,
            $bucket_size,
            $positions_per_block,
            $recursion_levels,
            $payload_size,
            300
        );
        create_correctness_test!(
            test_correctness_random_workload,
            $height,
            $bucket_size,
            $positions_per_block,
            $recursion_levels,
            $payload_size,
            300
        );
    };
}

pub(crate) use create_correctness_test;
pub(crate) use create_correctness_tests;
