//! Compile-time calculator for `{ ... }` expressions.
//!
//! All arithmetic is carried out in f64 until the caller casts the result
//! to the required operand width. There is no precedence climbing: each
//! unary alternative is tried in turn, then a terminal, then each binary
//! alternative. That left-to-right order is observable in pathological
//! expressions and is part of the language contract.
use super::Program;

fn sign(x: f64) -> f64 {
    ((0.0 < x) as i32 - (x < 0.0) as i32) as f64
}

impl<'s> Program<'s> {
    /// NUMBER | CONSTANT | VREGISTER | 'HERE' | 'PI' | 'E' | '(' expression ')'
    fn calc_terminal(&mut self, name: &str) -> f64 {
        if self.peek_is_register() {
            return self.register_or_alias() as f64;
        }
        if self.match_tok("PI") {
            return std::f64::consts::PI;
        }
        if self.match_tok("E") {
            return std::f64::consts::E;
        }
        if self.match_tok("HERE") {
            return self.here as f64;
        }
        let t = self.next();
        if t.is_number() {
            return t.num();
        }
        let n = t.str_value().cloned().unwrap_or_default();
        if self.protos.contains_key(&n) {
            self.raise(format!(
                "Cannot use forward declaration '{}' when calculating constant '{}'.",
                n, name
            ));
            return 0.0;
        }
        if let Some(c) = self.constants.get(&n) {
            return c.value;
        }
        if n != "(" {
            self.raise(format!(
                "Found undefined name '{}' when calculating constant '{}'.",
                n, name
            ));
            return 0.0;
        }
        let r = self.calc_expr(name);
        self.expect(")");
        r
    }

    fn calc_expr(&mut self, name: &str) -> f64 {
        // UNARY expression
        if self.match_tok("strlen") {
            return self.string().len() as f64;
        }
        if self.match_tok("-") {
            return -self.calc_expr(name);
        }
        if self.match_tok("~") {
            return !(self.calc_expr(name) as i64) as f64;
        }
        if self.match_tok("!") {
            return (self.calc_expr(name) as i64 == 0) as i32 as f64;
        }
        if self.match_tok("sin") {
            return self.calc_expr(name).sin();
        }
        if self.match_tok("cos") {
            return self.calc_expr(name).cos();
        }
        if self.match_tok("tan") {
            return self.calc_expr(name).tan();
        }
        if self.match_tok("exp") {
            return self.calc_expr(name).exp();
        }
        if self.match_tok("log") {
            return self.calc_expr(name).ln();
        }
        if self.match_tok("abs") {
            return self.calc_expr(name).abs();
        }
        if self.match_tok("sqrt") {
            return self.calc_expr(name).sqrt();
        }
        if self.match_tok("sign") {
            return sign(self.calc_expr(name));
        }
        if self.match_tok("ceil") {
            return self.calc_expr(name).ceil();
        }
        if self.match_tok("floor") {
            return self.calc_expr(name).floor();
        }
        if self.match_tok("@") {
            let addr = self.calc_expr(name) as i64;
            return if addr >= 0 && (addr as usize) < self.rom.len() {
                self.rom[addr as usize] as f64
            } else {
                0.0
            };
        }

        // expression BINARY expression
        let r = self.calc_terminal(name);
        self.calc_binary(name, r)
    }

    fn calc_binary(&mut self, name: &str, r: f64) -> f64 {
        if self.match_tok("-") {
            return r - self.calc_expr(name);
        }
        if self.match_tok("+") {
            return r + self.calc_expr(name);
        }
        if self.match_tok("*") {
            return r * self.calc_expr(name);
        }
        if self.match_tok("/") {
            return r / self.calc_expr(name);
        }
        if self.match_tok("%") {
            let rhs = self.calc_expr(name) as i64;
            return if rhs == 0 { 0.0 } else { ((r as i64) % rhs) as f64 };
        }
        if self.match_tok("&") {
            return ((r as i64) & self.calc_expr(name) as i64) as f64;
        }
        if self.match_tok("|") {
            return ((r as i64) | self.calc_expr(name) as i64) as f64;
        }
        if self.match_tok("^") {
            return ((r as i64) ^ self.calc_expr(name) as i64) as f64;
        }
        if self.match_tok("<<") {
            let rhs = self.calc_expr(name) as u32;
            return (r as i64).wrapping_shl(rhs) as f64;
        }
        if self.match_tok(">>") {
            let rhs = self.calc_expr(name) as u32;
            return (r as i64).wrapping_shr(rhs) as f64;
        }
        if self.match_tok("pow") {
            return r.powf(self.calc_expr(name));
        }
        if self.match_tok("min") {
            let rhs = self.calc_expr(name);
            return if r < rhs { r } else { rhs };
        }
        if self.match_tok("max") {
            let rhs = self.calc_expr(name);
            return if r < rhs { rhs } else { r };
        }
        if self.match_tok("<") {
            return (r < self.calc_expr(name)) as i32 as f64;
        }
        if self.match_tok(">") {
            return (r > self.calc_expr(name)) as i32 as f64;
        }
        if self.match_tok("<=") {
            return (r <= self.calc_expr(name)) as i32 as f64;
        }
        if self.match_tok(">=") {
            return (r >= self.calc_expr(name)) as i32 as f64;
        }
        if self.match_tok("==") {
            return (r == self.calc_expr(name)) as i32 as f64;
        }
        if self.match_tok("!=") {
            return (r != self.calc_expr(name)) as i32 as f64;
        }
        // terminal
        r
    }

    /// A braced `{ expression }`, evaluated now. `name` labels the
    /// surrounding definition in error messages.
    pub(crate) fn calculated(&mut self, name: &str) -> f64 {
        self.expect("{");
        let r = self.calc_expr(name);
        self.expect("}");
        r
    }
}
