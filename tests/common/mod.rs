#![allow(dead_code)]

use solum::vm::Vm;
use solum::{Compilation, SolumError};

pub fn compile(src: &str) -> Compilation {
    match solum::compile("test.slm", src) {
        Ok(compilation) => compilation,
        Err(failure) => panic!("compilation failed: {:#?}", failure.errs),
    }
}

/// Diagnostics of a compilation that is expected to fail
pub fn errors(src: &str) -> Vec<SolumError> {
    match solum::compile("test.slm", src) {
        Ok(_) => panic!("compilation unexpectedly succeeded"),
        Err(failure) => failure.errs,
    }
}

/// Interpret `main` and return its result together with the program output
pub fn run_main(src: &str) -> (Vec<u64>, String) {
    let compilation = compile(src);
    let mut vm = Vm::new(&compilation.program);
    let result = vm.call("main").unwrap();
    (result, vm.output_string())
}

pub fn main_result(src: &str) -> u64 {
    let (result, _) = run_main(src);
    assert_eq!(result.len(), 1, "main left {result:?}");
    result[0]
}
