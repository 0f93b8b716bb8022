use super::*;

#[test]
fn emitted_error_is_counted_and_reported() {
    let mut diags = Diagnostics::new();
    diags.error("unexpected token", Span::new(3, 4)).emit();
    assert!(diags.has_errors());
    assert_eq!(diags.error_count(), 1);
    assert_eq!(diags.len(), 1);
}

#[test]
fn warnings_do_not_count_as_errors() {
    let mut diags = Diagnostics::new();
    diags.warning("unused binding", Span::new(0, 1)).emit();
    assert!(!diags.has_errors());
    assert_eq!(diags.error_count(), 0);
}

#[test]
fn extend_merges_two_batches() {
    let mut a = Diagnostics::new();
    a.error("first", Span::new(0, 1)).emit();
    let mut b = Diagnostics::new();
    b.error("second", Span::new(1, 2)).emit();
    a.extend(b);
    assert_eq!(a.len(), 2);
}

#[test]
fn printer_renders_without_panicking() {
    let mut diags = Diagnostics::new();
    diags.error("bad token", Span::new(0, 1)).emit();
    let rendered = diags.printer("(+ 1 2)").to_string();
    assert!(rendered.contains("bad token"));
}
