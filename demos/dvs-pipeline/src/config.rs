// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::modules::{EventStatistics, NoiseFilter, SyntheticCamera, FILTERED};
use evflow::configuration::pipeline::{InputDecl, LibraryInfo, ModuleCatalog};
use evflow::prelude::*;

/// Pipeline used when no configuration file is given
pub const DEFAULT_CONFIG: &str = r#"{
    "camera": {
        "moduleId": 1,
        "moduleLibrary": "synthetic_camera",
        "eventRate": 200000
    },
    "filter": {
        "moduleId": 2,
        "moduleLibrary": "noise_filter",
        "moduleInput": "1[polarity]",
        "hotPixelLimit": 8
    },
    "statistics": {
        "moduleId": 3,
        "moduleLibrary": "event_statistics",
        "moduleInput": "2[filtered]",
        "logLevel": 3
    }
}"#;

/// Libraries available to the demonstration pipeline
pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .library(
            "synthetic_camera",
            LibraryInfo::new(ModuleKind::Input, SyntheticCamera::build)
                .output(OutputStream::new(EventType::POLARITY)),
        )
        .library(
            "noise_filter",
            LibraryInfo::new(ModuleKind::Processor, NoiseFilter::build)
                .input(InputDecl::of(EventType::POLARITY).streams(1))
                .output(OutputStream::new(FILTERED)),
        )
        .library(
            "event_statistics",
            LibraryInfo::new(ModuleKind::Output, EventStatistics::build).input(InputDecl::any_type()),
        )
}
