#![allow(dead_code)]

use veil::{
    Obfuscator, ObfuscatorOptions,
    eval::{self, EvalLimits, HostProfile, Outcome},
    parser, printer,
};

pub fn obfuscate(source: &str, config: &str) -> String {
    let options = ObfuscatorOptions::from_json(config).expect("invalid options");
    Obfuscator::new(options)
        .obfuscate(source)
        .expect("obfuscation failed")
}

/// The source as the printer would emit it untouched.
pub fn reprint(source: &str) -> String {
    printer::print_chunk(&parser::parse(source).expect("input does not parse"))
}

pub fn run(source: &str, host: HostProfile) -> Outcome {
    let chunk = parser::parse(source).expect("does not parse");
    eval::run_chunk(&chunk, host, EvalLimits::default()).expect("evaluation failed")
}

/// Obfuscate `source`, run both versions on `host` and compare what they
/// printed and returned. Returns the obfuscated source.
pub fn assert_equivalent(source: &str, config: &str, host: HostProfile) -> String {
    let out = obfuscate(source, config);
    let expected = run(source, host);
    let actual = run(&out, host);
    pretty_assertions::assert_eq!(expected, actual, "obfuscated source:\n{}", out);
    out
}

/// `test_case!(name, input: ..., output: ...)` checks that the obfuscated
/// program prints `output`, exactly like the input does. `config` (JSON
/// options) and `host` are optional.
#[macro_export]
macro_rules! test_case {
    (@or , $default:expr) => { $default };
    (@or $value:expr, $default:expr) => { $value };
    (
        $name:ident,
        input: $input:expr,
        output: $output:expr
        $(, config: $config:expr)?
        $(, host: $host:expr)?
        $(,)?
    ) => {
        #[test]
        fn $name() {
            let config: &str = $crate::test_case!(@or $($config)?, r#"{ "seed": "cases" }"#);
            let host: veil::eval::HostProfile =
                $crate::test_case!(@or $($host)?, veil::eval::HostProfile::default());
            let out = cases::assert_equivalent($input, config, host);
            pretty_assertions::assert_eq!(cases::run(&out, host).output, $output);
        }
    };
}
