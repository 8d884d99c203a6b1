//! Condition DSL parser.
//!
//! Recursive descent over the grammar:
//!
//! ```text
//! condition  := group | comparison
//! group      := ("AND" | "OR") "(" [condition ("," condition)*] ")"
//! comparison := expr cmp expr            cmp := < <= > >= == !=
//! expr       := term (("+" | "-") term)*
//! term       := factor (("*" | "/") factor)*
//! factor     := number | HH:MM[:SS] | "(" expr ")" | ltp | qty | oi | time
//!             | candle(tf, offset).field | indicator(name) | var(node, name)
//!             | position.(open_count | entry_price | unrealized_pnl
//!                         | realized_pnl | total_pnl)
//! ```
//!
//! Errors carry the character offset and what was expected versus found.

use chrono::NaiveTime;

use crate::domain::condition::{Comparator, Condition, GroupLogic};
use crate::domain::error::ParseError;
use crate::domain::expression::{ArithOp, Expression, PositionField};
use crate::domain::market::{CandleField, TickField, Timeframe};
use crate::domain::node::NodeId;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn is_ident_char(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_' || ch == '-'
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Identifier for node ids, indicator names, variable names and
    /// timeframes. Hyphens are allowed.
    fn parse_ident(&mut self, what: &str) -> Result<String, ParseError> {
        self.skip_whitespace();
        let ident: String = self.remaining().chars().take_while(|c| Self::is_ident_char(*c)).collect();
        if ident.is_empty() {
            let found = self.peek_word();
            return Err(self.error(format!("expected {}, found '{}'", what, found)));
        }
        self.pos += ident.len();
        Ok(ident)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_offset(&mut self) -> Result<i32, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let text = &self.input[start..self.pos];
        text.parse::<i32>().map_err(|_| ParseError {
            message: format!("expected candle offset, found '{}'", text),
            position: start,
        })
    }

    fn at_time_literal(&self) -> bool {
        let head: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ':')
            .collect();
        head.contains(':')
    }

    fn parse_time_literal(&mut self) -> Result<Expression, ParseError> {
        let start = self.pos;
        let text: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ':')
            .collect();
        self.pos += text.len();
        let format = if text.matches(':').count() == 2 {
            "%H:%M:%S"
        } else {
            "%H:%M"
        };
        NaiveTime::parse_from_str(&text, format)
            .map(Expression::TimeOfDay)
            .map_err(|_| ParseError {
                message: format!("invalid time of day '{}', expected HH:MM or HH:MM:SS", text),
                position: start,
            })
    }

    fn parse_candle_field(&mut self) -> Result<CandleField, ParseError> {
        self.skip_whitespace();
        let word = self.peek_word();
        let field = match word.as_str() {
            "open" => CandleField::Open,
            "high" => CandleField::High,
            "low" => CandleField::Low,
            "close" => CandleField::Close,
            "volume" => CandleField::Volume,
            _ => {
                return Err(self.error(format!(
                    "expected candle field (open, high, low, close, volume), found '{}'",
                    word
                )));
            }
        };
        self.pos += word.len();
        Ok(field)
    }

    fn parse_position_field(&mut self) -> Result<PositionField, ParseError> {
        let word = self.peek_word();
        let field = match word.as_str() {
            "open_count" => PositionField::OpenCount,
            "entry_price" => PositionField::EntryPrice,
            "unrealized_pnl" => PositionField::UnrealizedPnl,
            "realized_pnl" => PositionField::RealizedPnl,
            "total_pnl" => PositionField::TotalPnl,
            _ => {
                return Err(self.error(format!(
                    "expected position field (open_count, entry_price, unrealized_pnl, realized_pnl, total_pnl), found '{}'",
                    word
                )));
            }
        };
        self.pos += word.len();
        Ok(field)
    }

    fn parse_factor(&mut self) -> Result<Expression, ParseError> {
        self.skip_whitespace();

        if self.at_time_literal() {
            return self.parse_time_literal();
        }
        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Expression::Constant(self.parse_number()?));
        }
        if self.peek() == Some('(') {
            self.advance();
            let inner = self.parse_expr()?;
            self.expect_char(')')?;
            return Ok(inner);
        }

        if self.consume_keyword("ltp") {
            return Ok(Expression::Live(TickField::Ltp));
        }
        if self.consume_keyword("qty") {
            return Ok(Expression::Live(TickField::Quantity));
        }
        if self.consume_keyword("oi") {
            return Ok(Expression::Live(TickField::OpenInterest));
        }
        if self.consume_keyword("time") {
            return Ok(Expression::Time);
        }
        if self.consume_exact("candle(") {
            let timeframe = self.parse_ident("timeframe")?;
            self.expect_char(',')?;
            let offset = self.parse_offset()?;
            self.expect_char(')')?;
            self.expect_char('.')?;
            let field = self.parse_candle_field()?;
            return Ok(Expression::Candle {
                timeframe: Timeframe::new(timeframe),
                field,
                offset,
            });
        }
        if self.consume_exact("indicator(") {
            let name = self.parse_ident("indicator name")?;
            self.expect_char(')')?;
            return Ok(Expression::Indicator(name));
        }
        if self.consume_exact("var(") {
            let node = self.parse_ident("node id")?;
            self.expect_char(',')?;
            let name = self.parse_ident("variable name")?;
            self.expect_char(')')?;
            return Ok(Expression::NodeVariable {
                node_id: NodeId::new(node),
                name,
            });
        }
        if self.consume_exact("position.") {
            return Ok(Expression::Position(self.parse_position_field()?));
        }

        let word = self.peek_word();
        Err(self.error(format!("expected expression, found '{}'", word)))
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') => ArithOp::Mul,
                Some('/') => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Expression::binary(op, left, right);
        }
    }

    fn parse_expr(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => ArithOp::Add,
                Some('-') => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expression::binary(op, left, right);
        }
    }

    fn parse_comparator(&mut self) -> Result<Comparator, ParseError> {
        self.skip_whitespace();
        for (token, op) in [
            ("<=", Comparator::Le),
            (">=", Comparator::Ge),
            ("==", Comparator::Eq),
            ("!=", Comparator::Ne),
            ("<", Comparator::Lt),
            (">", Comparator::Gt),
        ] {
            if self.consume_exact(token) {
                return Ok(op);
            }
        }
        let found = self.peek_word();
        Err(self.error(format!("expected comparison operator, found '{}'", found)))
    }

    fn parse_comparison(&mut self) -> Result<Condition, ParseError> {
        let start = self.pos;
        let left = self.parse_expr()?;
        let op = self.parse_comparator()?;
        let right = self.parse_expr()?;

        let time_sides = [&left, &right].iter().filter(|e| e.is_time()).count();
        let literal_sides = [&left, &right]
            .iter()
            .filter(|e| matches!(e, Expression::TimeOfDay(_)))
            .count();
        if time_sides + literal_sides > 0 && !(time_sides == 1 && literal_sides == 1) {
            return Err(ParseError {
                message: "time must be compared with a HH:MM[:SS] literal".to_string(),
                position: start,
            });
        }

        Ok(Condition::Compare { left, op, right })
    }

    fn parse_group(&mut self, logic: GroupLogic) -> Result<Condition, ParseError> {
        self.expect_char('(')?;
        let mut conditions = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(Condition::Group { logic, conditions });
        }

        conditions.push(self.parse_condition()?);
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            conditions.push(self.parse_condition()?);
        }
        Ok(Condition::Group { logic, conditions })
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        self.skip_whitespace();
        if self.peek().is_none() {
            return Err(self.error("expected condition, found end of input".to_string()));
        }
        if self.consume_keyword("AND") {
            return self.parse_group(GroupLogic::And);
        }
        if self.consume_keyword("OR") {
            return self.parse_group(GroupLogic::Or);
        }
        self.parse_comparison()
    }

    fn parse(&mut self) -> Result<Condition, ParseError> {
        let condition = self.parse_condition()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after condition: '{}'",
                self.remaining()
            )));
        }
        Ok(condition)
    }
}

pub fn parse_condition(input: &str) -> Result<Condition, ParseError> {
    Parser::new(input).parse()
}

/// Parses a standalone expression, as used for node variables.
pub fn parse_expression(input: &str) -> Result<Expression, ParseError> {
    let mut parser = Parser::new(input);
    let expression = parser.parse_expr()?;
    parser.skip_whitespace();
    if parser.pos < input.len() {
        return Err(parser.error(format!(
            "unexpected input after expression: '{}'",
            parser.remaining()
        )));
    }
    Ok(expression)
}
