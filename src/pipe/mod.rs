// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Circular stream pipe: a bounded byte stream with blocking, non-blocking,
//! and readiness-polled producer/consumer access.

pub mod cancel;
pub mod stream;
