//! Recursive-descent parser. One call to [`parse_top_level`] consumes
//! exactly one parenthesized (or atomic) top-level form, or exactly one
//! token on error, matching the driver's resynchronization contract.

use crate::ast::{BinaryOp, Expr, Function, Prototype, UnaryOp};
use crate::diagnostics::{Diagnostics, Span};
use crate::lexer::{Token, TokenKind, TokenStream};
use wisp_core::Interner;

type PResult<T> = Result<T, (String, Span)>;

use std::sync::atomic::{AtomicU64, Ordering};

static GENSYM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn gensym(base: &str) -> String {
    let id = GENSYM_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{base}#lambda{id}")
}

struct Parser<'a, 'b> {
    tokens: &'a mut TokenStream<'b>,
    interner: &'a mut Interner,
}

pub fn parse_top_level(tokens: &mut TokenStream<'_>, interner: &mut Interner) -> (Option<Expr>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut parser = Parser { tokens, interner };
    match parser.parse_expression() {
        Ok(expr) => (Some(expr), diags),
        Err((msg, span)) => {
            diags.error(msg, span).emit();
            // Resynchronize by skipping exactly one token.
            parser.tokens.next_token();
            (None, diags)
        }
    }
}

impl<'a, 'b> Parser<'a, 'b> {
    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        let tok = self.tokens.next_token();
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err((format!("expected {what}"), Span::point(tok.offset)))
        }
    }

    fn parse_expression(&mut self) -> PResult<Expr> {
        let tok = self.tokens.peek().clone();
        match tok.kind {
            TokenKind::Open => self.parse_list(),
            TokenKind::Integer => {
                self.tokens.next_token();
                let n: i64 = tok.literal.parse().map_err(|_| {
                    ("malformed integer literal".to_string(), Span::point(tok.offset))
                })?;
                Ok(Expr::Int(n))
            }
            TokenKind::Nil => {
                self.tokens.next_token();
                Ok(Expr::Nil)
            }
            TokenKind::Symbol => {
                self.tokens.next_token();
                if tok.literal == "_obj" {
                    return Err(("`_obj` is a reserved identifier".to_string(), Span::point(tok.offset)));
                }
                Ok(Expr::Var(self.interner.intern(&tok.literal)))
            }
            TokenKind::Eof => Err(("unexpected end of input".to_string(), Span::point(tok.offset))),
            _ => Err((format!("unexpected token {:?}", tok.kind), Span::point(tok.offset))),
        }
    }

    /// Called with `(` already peeked but not consumed.
    fn parse_list(&mut self) -> PResult<Expr> {
        let open = self.tokens.next_token();
        if self.tokens.peek().kind == TokenKind::Close {
            self.tokens.next_token();
            return Ok(Expr::Var(self.interner.intern("nil")));
        }

        let head = self.tokens.peek().clone();
        let expr = match head.kind {
            TokenKind::Define => self.parse_define(),
            TokenKind::Set => self.parse_set(),
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::If => self.parse_if(),
            TokenKind::Cond => self.parse_cond(),
            TokenKind::Begin => self.parse_begin(),
            TokenKind::Add | TokenKind::Mul | TokenKind::Div | TokenKind::Gt | TokenKind::Lt
            | TokenKind::Eq | TokenKind::And | TokenKind::Or => self.parse_binary(head.kind),
            TokenKind::Sub => self.parse_sub(),
            TokenKind::Not | TokenKind::Box | TokenKind::Unbox => self.parse_unary(head.kind),
            TokenKind::SetBox => self.parse_setbox(),
            _ => self.parse_call(),
        }?;

        self.expect(TokenKind::Close, "`)`")?;
        let _ = open;
        Ok(expr)
    }

    fn parse_define(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `define`
        if self.tokens.peek().kind == TokenKind::Open {
            self.tokens.next_token();
            let name_tok = self.expect(TokenKind::Symbol, "function name")?;
            let name = self.interner.intern(&name_tok.literal);
            let mut formals = Vec::new();
            while self.tokens.peek().kind == TokenKind::Symbol {
                let arg = self.tokens.next_token();
                formals.push(self.interner.intern(&arg.literal));
            }
            self.expect(TokenKind::Close, "`)` closing formals list")?;
            let body = self.parse_body_until_close()?;
            Ok(Expr::Function(Box::new(Function {
                prototype: Prototype { name, formals },
                body,
            })))
        } else {
            let name_tok = self.expect(TokenKind::Symbol, "variable name")?;
            let name = self.interner.intern(&name_tok.literal);
            let init = self.parse_expression()?;
            Ok(Expr::VarDef(name, Box::new(init)))
        }
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `lambda`
        self.expect(TokenKind::Open, "`(` starting formals list")?;
        let mut formals = Vec::new();
        while self.tokens.peek().kind == TokenKind::Symbol {
            let arg = self.tokens.next_token();
            formals.push(self.interner.intern(&arg.literal));
        }
        self.expect(TokenKind::Close, "`)` closing formals list")?;
        let body = self.parse_body_until_close()?;
        let name = self.interner.intern(&gensym("anon"));
        Ok(Expr::Function(Box::new(Function {
            prototype: Prototype { name, formals },
            body,
        })))
    }

    fn parse_body_until_close(&mut self) -> PResult<Vec<Expr>> {
        let mut body = Vec::new();
        while self.tokens.peek().kind != TokenKind::Close {
            body.push(self.parse_expression()?);
        }
        Ok(body)
    }

    fn parse_set(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `set!`
        let name_tok = self.expect(TokenKind::Symbol, "variable name")?;
        let name = self.interner.intern(&name_tok.literal);
        let value = self.parse_expression()?;
        Ok(Expr::VarSet(name, Box::new(value)))
    }

    fn parse_if(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `if`
        let pred = self.parse_expression()?;
        let then_e = self.parse_expression()?;
        let else_e = self.parse_expression()?;
        Ok(Expr::If(Box::new(pred), Box::new(then_e), Box::new(else_e)))
    }

    /// `cond` is lowered right here into nested `if`, base case `nil`, so
    /// no `Cond` node ever exists past the parser.
    fn parse_cond(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `cond`
        let mut clauses = Vec::new();
        while self.tokens.peek().kind != TokenKind::Close {
            self.expect(TokenKind::Open, "`(` starting a cond clause")?;
            let pred = self.parse_expression()?;
            let result = self.parse_expression()?;
            self.expect(TokenKind::Close, "`)` closing a cond clause")?;
            clauses.push((pred, result));
        }
        let mut acc = Expr::Nil;
        for (pred, result) in clauses.into_iter().rev() {
            acc = Expr::If(Box::new(pred), Box::new(result), Box::new(acc));
        }
        Ok(acc)
    }

    fn parse_begin(&mut self) -> PResult<Expr> {
        self.tokens.next_token(); // `begin`
        let body = self.parse_body_until_close()?;
        Ok(Expr::Begin(body))
    }

    fn parse_binary(&mut self, kind: TokenKind) -> PResult<Expr> {
        self.tokens.next_token();
        let op = match kind {
            TokenKind::Add => BinaryOp::Add,
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::And => BinaryOp::And,
            TokenKind::Or => BinaryOp::Or,
            _ => unreachable!(),
        };
        let lhs = self.parse_expression()?;
        let rhs = self.parse_expression()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    /// `-` is binary subtraction, except `(- x)` with a single operand,
    /// which parses as `Binary(Sub, Int(0), x)`.
    fn parse_sub(&mut self) -> PResult<Expr> {
        self.tokens.next_token();
        let lhs = self.parse_expression()?;
        if self.tokens.peek().kind == TokenKind::Close {
            return Ok(Expr::Binary(BinaryOp::Sub, Box::new(Expr::Int(0)), Box::new(lhs)));
        }
        let rhs = self.parse_expression()?;
        Ok(Expr::Binary(BinaryOp::Sub, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_unary(&mut self, kind: TokenKind) -> PResult<Expr> {
        self.tokens.next_token();
        let op = match kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Box => UnaryOp::Box,
            TokenKind::Unbox => UnaryOp::Unbox,
            _ => unreachable!(),
        };
        let operand = self.parse_expression()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_setbox(&mut self) -> PResult<Expr> {
        self.tokens.next_token();
        let target = self.parse_expression()?;
        let value = self.parse_expression()?;
        Ok(Expr::Binary(BinaryOp::SetBox, Box::new(target), Box::new(value)))
    }

    /// A parenthesized form whose head is not a reserved word is an
    /// application; `symbol_hint` is the literal text of the leading
    /// token, captured before it is parsed as an expression.
    fn parse_call(&mut self) -> PResult<Expr> {
        let head = self.tokens.peek().clone();
        let symbol_hint = if head.kind == TokenKind::Symbol {
            Some(self.interner.intern(&head.literal))
        } else {
            None
        };
        let callee = self.parse_expression()?;
        let mut args = Vec::new();
        while self.tokens.peek().kind != TokenKind::Close {
            args.push(self.parse_expression()?);
        }
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            symbol_hint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> (Option<Expr>, Diagnostics) {
        let mut interner = Interner::new();
        let mut ts = TokenStream::new(src);
        parse_top_level(&mut ts, &mut interner)
    }

    #[test]
    fn parses_a_function_definition() {
        let (expr, diags) = parse_one("(define (square x) (* x x))");
        assert!(diags.is_empty());
        match expr.unwrap() {
            Expr::Function(f) => {
                assert_eq!(f.prototype.formals.len(), 1);
                assert_eq!(f.body.len(), 1);
            }
            _ => panic!("expected Function"),
        }
    }

    #[test]
    fn parses_a_variable_definition() {
        let (expr, diags) = parse_one("(define x 5)");
        assert!(diags.is_empty());
        assert!(matches!(expr.unwrap(), Expr::VarDef(_, _)));
    }

    #[test]
    fn unary_minus_with_one_operand_becomes_zero_minus_x() {
        let (expr, _) = parse_one("(- x)");
        match expr.unwrap() {
            Expr::Binary(BinaryOp::Sub, lhs, _) => assert!(matches!(*lhs, Expr::Int(0))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn binary_minus_with_two_operands_stays_binary() {
        let (expr, _) = parse_one("(- 10 3)");
        match expr.unwrap() {
            Expr::Binary(BinaryOp::Sub, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Int(10)));
                assert!(matches!(*rhs, Expr::Int(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_parens_parse_as_var_nil() {
        let (expr, _) = parse_one("()");
        assert!(matches!(expr.unwrap(), Expr::Var(_)));
    }

    #[test]
    fn cond_lowers_to_nested_if_with_nil_base() {
        let (expr, _) = parse_one("(cond ((= x 0) 1) ((> x 0) 2))");
        match expr.unwrap() {
            Expr::If(_, _, else_branch) => match *else_branch {
                Expr::If(_, _, inner_else) => assert!(matches!(*inner_else, Expr::Nil)),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cond_with_no_clauses_is_nil() {
        let (expr, _) = parse_one("(cond)");
        assert!(matches!(expr.unwrap(), Expr::Nil));
    }

    #[test]
    fn application_captures_symbol_hint_from_leading_token() {
        let (expr, _) = parse_one("(square 4)");
        match expr.unwrap() {
            Expr::Call { symbol_hint, args, .. } => {
                assert!(symbol_hint.is_some());
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn syntax_error_yields_none_and_a_diagnostic() {
        let (expr, diags) = parse_one(")");
        assert!(expr.is_none());
        assert!(diags.has_errors());
    }

    #[test]
    fn reserved_identifier_obj_is_rejected() {
        let (expr, diags) = parse_one("_obj");
        assert!(expr.is_none());
        assert!(diags.has_errors());
    }
}
