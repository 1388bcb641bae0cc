// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts};

lazy_static! {
    pub static ref BLOB_CACHE_BYTES_IN_USE: IntGaugeVec = {
        let gauge = IntGaugeVec::new(
            Opts::new(
                "blob_cache_bytes_in_use",
                "Bytes currently held by blocks in a blob cache",
            ),
            &["cache"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("registering blob_cache_bytes_in_use must succeed");
        gauge
    };

    pub static ref BLOB_CACHE_ENTRIES: IntGaugeVec = {
        let gauge = IntGaugeVec::new(
            Opts::new("blob_cache_entries", "Number of BlobEntry records in a blob cache"),
            &["cache"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("registering blob_cache_entries must succeed");
        gauge
    };

    pub static ref BLOB_CACHE_HITS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("blob_cache_hits_total", "Identity lookups that found an existing entry"),
            &["cache"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("registering blob_cache_hits_total must succeed");
        counter
    };

    pub static ref BLOB_CACHE_MISSES_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("blob_cache_misses_total", "Identity lookups that inserted a new entry"),
            &["cache"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("registering blob_cache_misses_total must succeed");
        counter
    };

    // Bucket set mirrors the distribution shape of an adjacent cache's own
    // block-size histogram: the same kind of observation, allocated block
    // capacities rather than raw record sizes.
    pub static ref BLOCK_SIZE_BYTES: Box<Histogram> = {
        let hist = Box::new(
            Histogram::with_opts(
                HistogramOpts::new("block_size", "Histogram of allocated block capacities").buckets(vec![
                    32., 64., 128., 256., 512., 1024., 2048., 4096., 8192., 16384., 32768., 65536.,
                ]),
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(hist.clone())
            .expect("registering block_size must succeed");
        hist
    };

    pub static ref RSD_BLOCKS_ON_DISK: IntGaugeVec = {
        let gauge = IntGaugeVec::new(
            Opts::new("rsd_blocks_on_disk", "Blocks currently purged to a scratch file"),
            &["store"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("registering rsd_blocks_on_disk must succeed");
        gauge
    };

    pub static ref ICC_PROFILES_CACHED: IntGauge = {
        let gauge = IntGauge::new("icc_profiles_cached", "Number of IccProfileInfo records cached").unwrap();
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("registering icc_profiles_cached must succeed");
        gauge
    };

    pub static ref MEMORY_HANDLER_OFFERS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("memory_handler_offers_total", "Offers a low-memory handler made"),
            &["handler"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("registering memory_handler_offers_total must succeed");
        counter
    };

    pub static ref MEMORY_HANDLER_RELEASES_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("memory_handler_releases_total", "Offers a low-memory handler actually released"),
            &["handler"],
        )
        .unwrap();
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("registering memory_handler_releases_total must succeed");
        counter
    };
}
