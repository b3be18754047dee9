//! Integer expressions for `(( ))`, `for (( ))` and `[[ -eq ]]`.

use crate::types::ShellError;
use crate::vars::Variables;

const MAX_RECURSION: usize = 16;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: [&str; 30] = [
    "<<=", ">>=", "&&", "||", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "++", "--", "<<",
    ">>", "+", "-", "*", "/", "%", "<", ">", "=", "!", "(", ")", "?", ":",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>, ShellError> {
    let mut toks = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            toks.push(Tok::Num(parse_number(&expr[start..i])?));
            continue;
        }
        if c == '_' || c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && (bytes[i] == b'_' || (bytes[i] as char).is_ascii_alphanumeric()) {
                i += 1;
            }
            toks.push(Tok::Ident(expr[start..i].to_string()));
            continue;
        }
        if c == ',' {
            toks.push(Tok::Op(","));
            i += 1;
            continue;
        }
        for op in OPERATORS {
            if expr[i..].starts_with(op) {
                toks.push(Tok::Op(op));
                i += op.len();
                continue 'outer;
            }
        }
        return Err(ShellError::Arithmetic(format!(
            "{}: syntax error: invalid arithmetic operator (error token is \"{}\")",
            expr,
            &expr[i..]
        )));
    }
    Ok(toks)
}

fn parse_number(text: &str) -> Result<i64, ShellError> {
    let invalid = || ShellError::Arithmetic(format!("{}: value too great for base", text));
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_err(|_| invalid());
    }
    if text.len() > 1 && text.starts_with('0') {
        return i64::from_str_radix(&text[1..], 8).map_err(|_| invalid());
    }
    text.parse().map_err(|_| invalid())
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    vars: &'a mut Variables,
    /// Non-zero while evaluating a branch whose value is discarded.
    noeval: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.toks.get(self.pos) {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ShellError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(ShellError::Arithmetic(format!("syntax error: `{}' expected", op)))
        }
    }

    fn value_of(&mut self, name: &str) -> Result<i64, ShellError> {
        let text = self.vars.get(name).unwrap_or("").trim().to_string();
        if text.is_empty() {
            return Ok(0);
        }
        if let Ok(n) = text.parse() {
            return Ok(n);
        }
        if self.depth >= MAX_RECURSION {
            return Err(ShellError::Arithmetic(format!(
                "{}: expression recursion level exceeded",
                name
            )));
        }
        evaluate_at(&text, self.vars, self.depth + 1)
    }

    fn store(&mut self, name: &str, value: i64) -> Result<i64, ShellError> {
        if self.noeval == 0 {
            self.vars.set(name, &value.to_string())?;
        }
        Ok(value)
    }

    fn comma(&mut self) -> Result<i64, ShellError> {
        let mut value = self.assignment()?;
        while self.eat(",") {
            value = self.assignment()?;
        }
        Ok(value)
    }

    fn assignment(&mut self) -> Result<i64, ShellError> {
        if let (Some(Tok::Ident(name)), Some(Tok::Op(op))) =
            (self.toks.get(self.pos).cloned(), self.toks.get(self.pos + 1).cloned())
        {
            if matches!(op, "=" | "+=" | "-=" | "*=" | "/=" | "%=" | "<<=" | ">>=") {
                self.pos += 2;
                let rhs = self.assignment()?;
                let value = if op == "=" {
                    rhs
                } else {
                    let lhs = self.value_of(&name)?;
                    self.binary(&op[..op.len() - 1], lhs, rhs)?
                };
                return self.store(&name, value);
            }
        }
        self.ternary()
    }

    fn ternary(&mut self) -> Result<i64, ShellError> {
        let cond = self.logical_or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        if cond == 0 {
            self.noeval += 1;
        }
        let yes = self.comma()?;
        if cond == 0 {
            self.noeval -= 1;
        }
        self.expect(":")?;
        if cond != 0 {
            self.noeval += 1;
        }
        let no = self.assignment()?;
        if cond != 0 {
            self.noeval -= 1;
        }
        Ok(if cond != 0 { yes } else { no })
    }

    fn logical_or(&mut self) -> Result<i64, ShellError> {
        let mut value = self.logical_and()?;
        while self.eat("||") {
            let skip = value != 0;
            self.noeval += skip as usize;
            let rhs = self.logical_and()?;
            self.noeval -= skip as usize;
            value = (value != 0 || rhs != 0) as i64;
        }
        Ok(value)
    }

    fn logical_and(&mut self) -> Result<i64, ShellError> {
        let mut value = self.equality()?;
        while self.eat("&&") {
            let skip = value == 0;
            self.noeval += skip as usize;
            let rhs = self.equality()?;
            self.noeval -= skip as usize;
            value = (value != 0 && rhs != 0) as i64;
        }
        Ok(value)
    }

    fn left_assoc(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<i64, ShellError>,
    ) -> Result<i64, ShellError> {
        let mut value = next(self)?;
        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            self.pos += 1;
            let rhs = next(self)?;
            value = self.binary(op, value, rhs)?;
        }
        Ok(value)
    }

    fn equality(&mut self) -> Result<i64, ShellError> {
        self.left_assoc(&["==", "!="], Self::relational)
    }

    fn relational(&mut self) -> Result<i64, ShellError> {
        self.left_assoc(&["<=", ">=", "<", ">"], Self::shift)
    }

    fn shift(&mut self) -> Result<i64, ShellError> {
        self.left_assoc(&["<<", ">>"], Self::additive)
    }

    fn additive(&mut self) -> Result<i64, ShellError> {
        self.left_assoc(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<i64, ShellError> {
        self.left_assoc(&["*", "/", "%"], Self::unary)
    }

    fn binary(&self, op: &str, lhs: i64, rhs: i64) -> Result<i64, ShellError> {
        Ok(match op {
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" | "%" if rhs == 0 => {
                if self.noeval > 0 {
                    0
                } else {
                    return Err(ShellError::Arithmetic("division by 0".to_string()));
                }
            }
            "/" => lhs.wrapping_div(rhs),
            "%" => lhs.wrapping_rem(rhs),
            "<<" => lhs.wrapping_shl(rhs as u32),
            ">>" => lhs.wrapping_shr(rhs as u32),
            "<" => (lhs < rhs) as i64,
            ">" => (lhs > rhs) as i64,
            "<=" => (lhs <= rhs) as i64,
            ">=" => (lhs >= rhs) as i64,
            "==" => (lhs == rhs) as i64,
            "!=" => (lhs != rhs) as i64,
            _ => return Err(ShellError::Arithmetic(format!("{}: unknown operator", op))),
        })
    }

    fn unary(&mut self) -> Result<i64, ShellError> {
        if self.eat("!") {
            return Ok((self.unary()? == 0) as i64);
        }
        if self.eat("-") {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat("+") {
            return self.unary();
        }
        for (op, delta) in [("++", 1), ("--", -1)] {
            if self.eat(op) {
                let Some(Tok::Ident(name)) = self.toks.get(self.pos).cloned() else {
                    return Err(ShellError::Arithmetic(format!("{}: operand expected", op)));
                };
                self.pos += 1;
                let value = self.value_of(&name)? + delta;
                return self.store(&name, value);
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<i64, ShellError> {
        if let Some(Tok::Ident(name)) = self.toks.get(self.pos).cloned() {
            self.pos += 1;
            let value = self.value_of(&name)?;
            for (op, delta) in [("++", 1), ("--", -1)] {
                if self.eat(op) {
                    self.store(&name, value + delta)?;
                    return Ok(value);
                }
            }
            return Ok(value);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, ShellError> {
        match self.toks.get(self.pos).cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Tok::Op("(")) => {
                self.pos += 1;
                let value = self.comma()?;
                self.expect(")")?;
                Ok(value)
            }
            Some(tok) => Err(ShellError::Arithmetic(format!(
                "syntax error: operand expected (error token is {:?})",
                tok
            ))),
            None => Err(ShellError::Arithmetic(
                "syntax error: operand expected".to_string(),
            )),
        }
    }
}

fn evaluate_at(expr: &str, vars: &mut Variables, depth: usize) -> Result<i64, ShellError> {
    let toks = tokenize(expr)?;
    if toks.is_empty() {
        return Ok(0);
    }
    let mut parser = Parser {
        toks,
        pos: 0,
        vars,
        noeval: 0,
        depth,
    };
    let value = parser.comma()?;
    if parser.pos < parser.toks.len() {
        return Err(ShellError::Arithmetic(format!(
            "{}: syntax error in expression",
            expr
        )));
    }
    Ok(value)
}

/// Evaluate `expr`, reading and assigning shell variables. An empty
/// expression is 0.
pub fn evaluate(expr: &str, vars: &mut Variables) -> Result<i64, ShellError> {
    evaluate_at(expr, vars, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str, vars: &mut Variables) -> i64 {
        evaluate(expr, vars).unwrap()
    }

    #[test]
    fn precedence_and_grouping() {
        let mut vars = Variables::new();
        assert_eq!(eval("1 + 2 * 3", &mut vars), 7);
        assert_eq!(eval("(1 + 2) * 3", &mut vars), 9);
        assert_eq!(eval("7 % 4 == 3 && 1 < 2", &mut vars), 1);
        assert_eq!(eval("!0 + -3", &mut vars), -2);
        assert_eq!(eval("0x10 + 010", &mut vars), 24);
        assert_eq!(eval("", &mut vars), 0);
    }

    #[test]
    fn assignment_and_increment() {
        let mut vars = Variables::new();
        assert_eq!(eval("i = 0", &mut vars), 0);
        assert_eq!(eval("i++", &mut vars), 0);
        assert_eq!(eval("++i", &mut vars), 2);
        assert_eq!(eval("i += 5, i * 2", &mut vars), 14);
        assert_eq!(vars.get("i"), Some("7"));
    }

    #[test]
    fn short_circuit_skips_side_effects() {
        let mut vars = Variables::new();
        assert_eq!(eval("0 && (x = 1)", &mut vars), 0);
        assert_eq!(eval("1 || 1 / 0", &mut vars), 1);
        assert_eq!(eval("1 ? 2 : (y = 3)", &mut vars), 2);
        assert!(vars.get("x").is_none());
        assert!(vars.get("y").is_none());
    }

    #[test]
    fn variables_holding_expressions() {
        let mut vars = Variables::new();
        vars.set("a", "b + 1").unwrap();
        vars.set("b", "4").unwrap();
        assert_eq!(eval("a * 2", &mut vars), 10);
    }

    #[test]
    fn errors() {
        let mut vars = Variables::new();
        assert!(evaluate("1 / 0", &mut vars).is_err());
        assert!(evaluate("1 +", &mut vars).is_err());
        assert!(evaluate("1 @ 2", &mut vars).is_err());
    }
}
