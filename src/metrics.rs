// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, HistogramVec};

pub static OVERLAYDB_OP_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        // metric name
        "overlaydb_op_latency_seconds",
        // metric description
        "Latency of overlaydb operations.",
        &["op"]
    )
    .unwrap()
});
