mod cases;

use indoc::indoc;
use veil::eval::HostProfile;

const PROGRAM: &str = indoc! {r#"
    local function mix(a, b, s)
        local t = {}
        for i = 1, a do
            t[#t + 1] = (i * b) % 7
        end
        local acc = 0
        for _, v in ipairs(t) do
            if v > 3 then acc = acc + v else acc = acc - 1 end
        end
        local parts = {}
        local k = 0
        while k < 3 do
            k = k + 1
            parts[k] = s .. k
        end
        return acc, table.concat(parts, ","), #t, acc // 2 == 0
    end
    print(mix(6, 3, "p"))
    print(mix(0, 1, "q"))
    print(mix(10, 5, "r"))
"#};

const CONFIGS: &[&str] = &[
    r#"{ "vm": { "dispatch": "linear" } }"#,
    r#"{ "vm": { "dispatch": "linear", "opcode_shuffle": false, "runtime_key": false, "stream_split": false } }"#,
    r#"{ "vm": { "dispatch": "linear", "stream_bytes": true, "const_shards": true } }"#,
    r#"{ "vm": { "dispatch": "linear", "pool_placement": "lazy", "fake_density": 1.0, "decoy_probability": 1.0 } }"#,
    r#"{ "vm": { "dispatch": "linear", "const_encryption": false, "fake_instructions": false } }"#,
    r#"{ "vm": { "dispatch": "block", "dispatch_graph": "tree", "stack_protocol": "direct" } }"#,
    r#"{ "vm": { "dispatch": "block", "dispatch_graph": "sparse", "stack_protocol": "api" } }"#,
    r#"{ "vm": { "dispatch": "block", "polymorphism": "always", "fake_edges": true } }"#,
    r#"{ "vm": { "dispatch": "block", "polymorphism": "off", "fake_edges": false, "runtime_key": false } }"#,
    r#"{ "vm": { "dispatch": "block", "pool_placement": "lazy", "const_shards": true } }"#,
];

fn with_seed(config: &str, seed: &str) -> String {
    config.replacen('{', &format!(r#"{{ "seed": "{}","#, seed), 1)
}

#[test]
fn test_every_mode_preserves_behaviour() {
    for config in CONFIGS {
        for seed in ["a", "b", "c"] {
            cases::assert_equivalent(PROGRAM, &with_seed(config, seed), HostProfile::default());
        }
    }
}

#[test]
fn test_every_mode_reparses_to_itself() {
    for config in CONFIGS {
        let out = cases::obfuscate(PROGRAM, &with_seed(config, "reparse"));
        assert_eq!(cases::reprint(&out), out);
    }
}

#[test]
fn test_two_layers() {
    for dispatch in ["linear", "block"] {
        let config = format!(
            r#"{{ "seed": "layers", "vm": {{ "dispatch": "{}", "layers": 2 }} }}"#,
            dispatch
        );
        let once = cases::obfuscate(
            PROGRAM,
            &format!(r#"{{ "seed": "layers", "vm": {{ "dispatch": "{}" }} }}"#, dispatch),
        );
        let twice = cases::assert_equivalent(PROGRAM, &config, HostProfile::default());
        assert!(twice.len() > once.len());
    }
}

#[test]
fn test_generated_code_hides_program_strings() {
    let source = r#"local function f() return "needle-in-haystack" end print(f())"#;
    for config in [
        r#"{ "seed": "s", "vm": { "dispatch": "linear" } }"#,
        r#"{ "seed": "s", "vm": { "dispatch": "block" } }"#,
    ] {
        let out = cases::assert_equivalent(source, config, HostProfile::default());
        assert!(!out.contains("needle-in-haystack"));
    }
}
