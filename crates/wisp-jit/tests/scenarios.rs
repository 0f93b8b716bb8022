//! End-to-end scenarios: source text in, JIT-compiled and run through a
//! fresh [`Driver`], evaluated results out. Each test owns its own driver
//! so closures and mutable state from one scenario never leak into
//! another.

use wisp_compiler::lexer::{TokenKind, TokenStream};
use wisp_jit::Driver;

/// Runs every top-level form in `src` through a fresh driver and returns
/// the evaluated result of each non-definition expression, in order.
fn run_all(src: &str) -> Vec<i64> {
    let mut driver = Driver::new().expect("JIT backend initializes");
    let mut tokens = TokenStream::new(src);
    let mut results = Vec::new();
    loop {
        if tokens.peek().kind == TokenKind::Eof {
            break;
        }
        match driver.handle_top_level(&mut tokens, src) {
            Ok(Some(n)) => results.push(n),
            Ok(None) => {}
            Err(e) => panic!("unexpected driver error: {e}"),
        }
    }
    results
}

fn run_one(src: &str) -> i64 {
    let results = run_all(src);
    *results.last().expect("scenario produced a printable result")
}

#[test]
fn square_calls_the_built_in_directly() {
    assert_eq!(run_one("(square 5)"), 25);
}

#[test]
fn sum_of_squares_composes_two_calls_to_a_built_in() {
    let src = "
        (define (sum-of-squares x y) (+ (square x) (square y)))
        (sum-of-squares 3 4)
    ";
    assert_eq!(run_one(src), 25);
}

#[test]
fn cond_lowers_to_nested_if_and_picks_the_right_branch() {
    let src = "
        (define (sign x) (cond ((< x 0) -1) ((> x 0) 1) (1 0)))
        (sign -7)
        (sign 7)
        (sign 0)
    ";
    assert_eq!(run_all(src), vec![-1, 1, 0]);
}

#[test]
fn make_adder_captures_n_across_the_closure_boundary() {
    let src = "
        (define (make-adder n) (define (add k) (+ n k)) add)
        ((make-adder 5) 3)
    ";
    assert_eq!(run_one(src), 8);
}

#[test]
fn make_adder_keeps_captures_independent_per_instance() {
    let src = "
        (define (make-adder n) (define (add k) (+ n k)) add)
        (+ ((make-adder 5) 1) ((make-adder 100) 1))
    ";
    assert_eq!(run_one(src), 107);
}

#[test]
fn counter_shares_mutable_state_across_repeated_calls() {
    let src = "
        (define (counter) (define n 0) (define (tick) (set! n (+ n 1)) n) tick)
        (begin (define c (counter)) (c) (c) (c))
    ";
    assert_eq!(run_one(src), 3);
}

#[test]
fn withdraw_mutates_the_enclosing_balance_across_calls() {
    let src = "
        (define (make-account balance)
          (define (withdraw amount)
            (if (> amount balance)
                (- 0 1)
                (begin (set! balance (- balance amount)) balance)))
          withdraw)
        (begin (define acc (make-account 100)) (acc 30) (acc 40))
    ";
    assert_eq!(run_one(src), 30);
}

#[test]
fn withdraw_rejects_an_overdraft_with_the_sentinel() {
    let src = "
        (define (make-account balance)
          (define (withdraw amount)
            (if (> amount balance)
                (- 0 1)
                (begin (set! balance (- balance amount)) balance)))
          withdraw)
        (begin (define acc (make-account 10)) (acc 50))
    ";
    assert_eq!(run_one(src), -1);
}

#[test]
fn a_direct_call_with_the_wrong_arity_drops_that_form_and_keeps_the_driver_alive() {
    let src = "
        (define (bad) (square 1 2))
        (square 6)
    ";
    assert_eq!(run_all(src), vec![36]);
}

#[test]
fn an_unbound_name_drops_that_form_and_keeps_the_driver_alive() {
    let src = "
        (define (bad) (+ nope 1))
        (square 7)
    ";
    assert_eq!(run_all(src), vec![49]);
}
