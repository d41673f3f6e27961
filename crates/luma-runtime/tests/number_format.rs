//! Number stringification properties

mod common;

use common::output;
use luma_runtime::value::format_number;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

#[rstest]
#[case(7.0, "7")]
#[case(0.5, "0.5")]
#[case(55.0, "55")]
#[case(-2.25, "-2.25")]
#[case(0.0, "0")]
#[case(100.0, "100")]
#[case(1.000001, "1.000001")]
fn test_format_number(#[case] n: f64, #[case] expected: &str) {
    assert_eq!(format_number(n), expected);
}

#[test]
fn test_print_strips_trailing_zeros() {
    assert_eq!(output("print(7.0);"), "7 \n");
    assert_eq!(output("print(2.50);"), "2.5 \n");
}

/// `string(number(s)) == s` for any `s` produced by `string(n)`.
#[test]
fn test_round_trip_through_the_language() {
    let source = "
        s = string(3.25);
        print(string(number(s)) == string(3.25));
    ";
    // String equality is identity, so compare through a second rendering.
    let check = "
        a = string(number(string(3.25)));
        b = string(3.25);
        print(a[0] == b[0], a[1] == b[1], a[2] == b[2], a[3] == b[3]);
    ";
    assert_eq!(output(source), "false \n");
    assert_eq!(output(check), "true true true true \n");
}

proptest! {
    /// Rendering is a fixed point: parse(format(n)) re-formats identically.
    #[test]
    fn prop_format_round_trip(n in -1.0e9..1.0e9f64) {
        let rendered = format_number(n);
        let parsed: f64 = rendered.parse().unwrap();
        prop_assert_eq!(format_number(parsed), rendered);
    }

    /// The rendering never ends in a dangling zero fraction or point.
    #[test]
    fn prop_no_trailing_decoration(n in -1.0e9..1.0e9f64) {
        let rendered = format_number(n);
        prop_assert!(!rendered.ends_with('.'));
        if rendered.contains('.') {
            prop_assert!(!rendered.ends_with('0'));
        }
    }
}
