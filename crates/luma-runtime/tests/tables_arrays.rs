//! Tables, arrays, strings: attribute access, meta chains, `self` binding,
//! operator hooks, and the identity-preserving string concatenation

mod common;

use common::{output, runtime_error};
use luma_runtime::RuntimeError;
use pretty_assertions::assert_eq;

#[test]
fn test_table_member_read_write() {
    let source = "
        t = { a = 1 };
        t.b = 2;
        print(t.a + t.b);
    ";
    assert_eq!(output(source), "3 \n");
}

#[test]
fn test_absent_member_reads_nil() {
    assert_eq!(output("t = {}; print(t.missing);"), "nil \n");
}

#[test]
fn test_meta_lookup_with_self_binding() {
    let source = "
        base = { hello = fn() print(self.name); };
        a = { name = \"A\" } meta base;
        a.hello();
    ";
    assert_eq!(output(source), "A \n");
}

#[test]
fn test_meta_chain_of_two_links() {
    let source = "
        root = { kind = \"root\" };
        mid = { level = 2 } meta root;
        leaf = {} meta mid;
        print(leaf.kind);
        print(leaf.level);
    ";
    assert_eq!(output(source), "root \n2 \n");
}

#[test]
fn test_own_member_shadows_meta() {
    let source = "
        base = { v = 1 };
        t = { v = 2 } meta base;
        print(t.v);
    ";
    assert_eq!(output(source), "2 \n");
}

/// Self binding happens per lookup: reaching the same function through a
/// different receiver rebinds it.
#[test]
fn test_self_rebinds_per_lookup() {
    let source = "
        base = { who = fn() self.name; };
        a = { name = \"a\" } meta base;
        b = { name = \"b\" } meta base;
        print(a.who());
        print(b.who());
        print(a.who());
    ";
    assert_eq!(output(source), "a \nb \na \n");
}

#[test]
fn test_meta_chain_traversal_is_bounded() {
    // Build a chain longer than the traversal limit.
    let mut source = String::from("t0 = {};\n");
    for i in 1..=70 {
        source.push_str(&format!("t{} = {{}} meta t{};\n", i, i - 1));
    }
    source.push_str("print(t70.missing);");
    assert!(matches!(
        runtime_error(&source),
        RuntimeError::MetaChainTooLong { .. }
    ));
}

#[test]
fn test_table_add_hook() {
    let source = "
        v = { __add = fn(b) b + 1; };
        print(v + 41);
    ";
    assert_eq!(output(source), "42 \n");
}

#[test]
fn test_table_add_hook_uses_self() {
    let source = "
        v = { base = 10, __add = fn(b) self.base + b; };
        print(v + 5);
    ";
    assert_eq!(output(source), "15 \n");
}

#[test]
fn test_table_without_add_hook_errors() {
    assert!(matches!(
        runtime_error("t = {}; x = t + 1;"),
        RuntimeError::Type { .. }
    ));
}

#[test]
fn test_table_to_string_hook() {
    let source = "
        p = { name = \"Ada\", __to_string = fn() string(\"P:\", self.name); };
        print(p);
    ";
    assert_eq!(output(source), "P:Ada \n");
}

/// A hook body that itself calls another function must run to its own
/// matching return, not the first return executed.
#[test]
fn test_hook_with_nested_call() {
    let source = "
        fn double(n) n * 2;
        v = { __add = fn(b) double(b) + 1; };
        print(v + 20);
    ";
    assert_eq!(output(source), "41 \n");
}

#[test]
fn test_default_table_rendering_is_name_ordered() {
    assert_eq!(
        output("print({ b = 2, a = 1 });"),
        "{ 'a': 1, 'b': 2 } \n"
    );
    assert_eq!(output("print({});"), "{  } \n");
}

// === Arrays ===

#[test]
fn test_array_literal_and_index() {
    let source = "
        a = [10, 20, 30];
        print(a[0]);
        print(a[2]);
    ";
    assert_eq!(output(source), "10 \n30 \n");
}

#[test]
fn test_array_index_store() {
    let source = "
        a = [1, 2, 3];
        a[1] = 9;
        print(a);
    ";
    assert_eq!(output(source), "[1, 9, 3] \n");
}

#[test]
fn test_array_add_appends_and_returns_handle() {
    let source = "
        a = [1];
        b = a + 2;
        print(a);
        print(a == b);
    ";
    assert_eq!(output(source), "[1, 2] \ntrue \n");
}

#[test]
fn test_array_out_of_range_read() {
    assert!(matches!(
        runtime_error("a = [1]; print(a[3]);"),
        RuntimeError::IndexOutOfRange { index: 3, len: 1, .. }
    ));
}

#[test]
fn test_array_out_of_range_store() {
    assert!(matches!(
        runtime_error("a = [1]; a[5] = 0;"),
        RuntimeError::IndexOutOfRange { .. }
    ));
}

#[test]
fn test_negative_index_errors() {
    assert!(matches!(
        runtime_error("a = [1]; print(a[0 - 1]);"),
        RuntimeError::IndexOutOfRange { .. }
    ));
}

#[test]
fn test_indexed_read_on_non_object_errors() {
    assert!(matches!(
        runtime_error("x = 5; print(x[0]);"),
        RuntimeError::Type { .. }
    ));
}

#[test]
fn test_attribute_read_on_number_errors() {
    assert!(matches!(
        runtime_error("x = 5; print(x.y);"),
        RuntimeError::Type { .. }
    ));
}

// === Strings ===

/// The concatenation scenario: `+` mutates the left string in place and
/// returns the same handle.
#[test]
fn test_string_concat_preserves_identity() {
    let source = "
        s = \"a\";
        t = s + \"b\";
        print(s);
        print(t);
        print(s == t);
    ";
    assert_eq!(output(source), "ab \nab \ntrue \n");
}

#[test]
fn test_string_concat_stringifies_right_operand() {
    assert_eq!(output("print(\"n=\" + 4);"), "n=4 \n");
    assert_eq!(output("print(\"v=\" + nil);"), "v=nil \n");
}

#[test]
fn test_string_equality_is_identity() {
    let source = "
        a = \"x\";
        b = \"x\";
        print(a == b);
        print(a == a);
    ";
    assert_eq!(output(source), "false \ntrue \n");
}

#[test]
fn test_string_indexing_yields_bytes() {
    assert_eq!(output("s = \"AB\"; print(s[0]);"), "65 \n");
}

#[test]
fn test_string_byte_store() {
    let source = "
        s = \"AB\";
        s[0] = 66;
        print(s);
    ";
    assert_eq!(output(source), "BB \n");
}
