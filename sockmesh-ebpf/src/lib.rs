#![no_std]

// This file exists so sockmesh can list sockmesh-ebpf as a build dependency,
// which makes cargo rebuild the object whenever the program changes.
