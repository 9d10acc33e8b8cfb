#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;
extern crate serde_yaml;

// templating
#[macro_use]
extern crate tera;

// graphing
extern crate petgraph;

#[macro_use]
extern crate log;

extern crate chrono;
extern crate flate2;
extern crate hex;
extern crate regex;
extern crate sha2;
extern crate tar;
extern crate threadpool;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Fmt(::std::fmt::Error);
        Io(::std::io::Error) #[cfg(unix)];
        Float(::std::num::ParseFloatError);
        Int(::std::num::ParseIntError);
        Tmpl(tera::Error);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
        Time(::std::time::SystemTimeError);
    }
    errors {
        ManifestRender(reason: String) {
            description("manifest failed to render")
            display("manifest failed to render: {}", &reason)
        }
        ManifestParse(reason: String) {
            description("manifest failed to parse")
            display("manifest failed to parse: {}", &reason)
        }
        ManifestValidation(problems: String) {
            description("manifest does not validate")
            display("manifest does not validate:\n{}", &problems)
        }
        ManifestCycle(edges: String) {
            description("container dependencies form a cycle")
            display("container dependencies form a cycle: {}", &edges)
        }
        EngineUnavailable(reason: String) {
            description("container engine not reachable")
            display("container engine not reachable: {}", &reason)
        }
        EngineOperationFailed(op: String, target: String) {
            description("engine operation failed")
            display("engine {} failed for {}", &op, &target)
        }
        ImagePullFailed(image: String) {
            description("image pull failed")
            display("failed to pull {}", &image)
        }
        WaitExitNonZero(container: String, code: i64) {
            description("container exited non-zero within the wait window")
            display("{} exited with code {} within the wait window", &container, code)
        }
        Canceled {
            description("plan aborted by cancellation")
            display("plan aborted by cancellation")
        }
        InvalidArchive(reason: String) {
            description("release archive is invalid")
            display("release archive is invalid: {}", &reason)
        }
    }
}

/// Relaxed deserialization helpers for manifest shorthands
pub mod deserializers;

/// Structs that exist in the manifest
pub mod structs;

/// The pod manifest and its load pipeline
pub mod manifest;
pub use crate::manifest::{Manifest, VariableBag};

/// A dependency graph over pod containers using `petgraph`
pub mod graph;

/// Action and plan types
pub mod plan;
pub use crate::plan::{Action, Op, Plan};

/// The differ between declared and observed containers
pub mod diff;

/// The plan executor
pub mod runner;

/// The engine capability consumed by the differ and runner
pub mod engine;
pub use crate::engine::{EngineClient, ObservedContainer};

/// A subprocess driver for the `docker` CLI
pub mod docker;

/// Image retention cleanup
pub mod retention;

/// Structured plan reporting
pub mod report;

/// Release archive packing and loading
pub mod archive;
