mod cases;

use indoc::indoc;
use veil::eval::HostProfile;

const PROGRAM: &str = indoc! {r##"
    local function f(a, b)
        local t = {a, b, a + b}
        local s = ""
        for i = 1, #t do s = s .. t[i] .. ";" end
        return s, select("#", a, b), tostring(a == b)
    end
    print(f(2, 9))
    print(f(4, 4))
    print(f(-1.5, 2))
"##};

fn check_host(host: HostProfile) {
    for dispatch in ["linear", "block"] {
        for seed in ["h1", "h2"] {
            let config = format!(
                r#"{{ "seed": "{}", "vm": {{ "dispatch": "{}", "decoy_probability": 1.0 }} }}"#,
                seed, dispatch
            );
            cases::assert_equivalent(PROGRAM, &config, host);
        }
    }
}

#[test]
fn test_host_without_bit32_or_table_pack() {
    check_host(HostProfile::minimal());
}

#[test]
fn test_host_with_env_instead_of_getfenv() {
    check_host(HostProfile::env_only());
}

#[test]
fn test_host_with_everything() {
    check_host(HostProfile::default());
}
