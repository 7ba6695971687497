//! upnpfuzz: a protocol-aware network fuzzer for UPnP device stacks.
//!
//! This crate synthesizes structurally valid requests for the three UPnP
//! sub-protocols (SSDP discovery, SOAP action invocation, and eventing
//! subscription), mutates them under one of several strategies, delivers
//! them to a target device, and records the inputs that coincide with loss
//! of liveness. See each module for the protocol it is responsible for.

pub mod config;
pub mod discover;
pub mod display;
pub mod fuzzers;
pub mod generator;
pub mod monitor;
pub mod mutator;
pub mod network;
pub mod runner;
pub mod strategy;
pub mod xml;
