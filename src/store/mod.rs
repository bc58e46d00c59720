// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Sparse quantum store: an offset-addressed, lazily allocated byte device.

pub mod handle;
pub mod quantum;
