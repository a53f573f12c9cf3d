use crate::ast::*;
use crate::error::RenderError;
use crate::lexer::{LexOptions, Token, Tokenizer};
use crate::syntax::Syntax;
use std::collections::VecDeque;

pub struct Parser<'a> {
    lexer: Tokenizer<'a>,
    buffer: VecDeque<(Token, usize)>,
    line: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str, syntax: &'a Syntax, options: LexOptions) -> Self {
        Self {
            lexer: Tokenizer::new(input, syntax, options),
            buffer: VecDeque::new(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&mut self, n: usize) -> Result<Option<Token>, RenderError> {
        while self.buffer.len() <= n {
            let line = self.lexer.line();
            match self.lexer.next_token()? {
                Some(token) => self.buffer.push_back((token, line)),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.get(n).map(|(token, _)| token.clone()))
    }

    fn consume(&mut self) -> Result<Option<Token>, RenderError> {
        let next = match self.buffer.pop_front() {
            Some(entry) => Some(entry),
            None => {
                let line = self.lexer.line();
                self.lexer.next_token()?.map(|token| (token, line))
            }
        };
        Ok(next.map(|(token, line)| {
            self.line = line;
            token
        }))
    }

    fn expect(&mut self, token: Token) -> Result<(), RenderError> {
        match self.consume()? {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(self.error(format!("expected {:?}, got {:?}", token, t))),
            None => Err(self.error(format!("expected {:?}, got end of template", token))),
        }
    }

    fn eat(&mut self, token: Token) -> Result<bool, RenderError> {
        if self.peek(0)?.as_ref() == Some(&token) {
            self.consume()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, RenderError> {
        match self.consume()? {
            Some(Token::Ident(s)) => Ok(s),
            t => Err(self.error(format!("expected identifier for {}, got {:?}", what, t))),
        }
    }

    /// Parses a whole template and fails on stray `endif`/`endfor`/`else` tags.
    pub fn parse_template(&mut self) -> Result<Template, RenderError> {
        let nodes = self.parse()?;
        match self.peek(1)? {
            None => Ok(nodes),
            Some(t) => Err(self.error(format!("unexpected {:?} tag", t))),
        }
    }

    pub fn parse(&mut self) -> Result<Template, RenderError> {
        let mut nodes = Vec::new();
        loop {
            // Lookahead for termination conditions
            if let Some(Token::BlockStart) = self.peek(0)? {
                if let Some(Token::EndFor | Token::EndIf | Token::Else | Token::Elif) = self.peek(1)? {
                    // Block terminator found; stop parsing this sequence
                    break;
                }
            }

            match self.peek(0)? {
                None => break,
                Some(Token::Text(s)) => {
                    self.consume()?;
                    nodes.push(Node::Text(s));
                }
                Some(Token::VarStart) => {
                    self.consume()?; // {{
                    let expr = self.parse_expr()?;
                    self.expect(Token::VarEnd)?;
                    nodes.push(Node::Var(expr));
                }
                Some(Token::BlockStart) => {
                    self.consume()?; // {%
                    match self.peek(0)? {
                        Some(Token::For) => nodes.push(self.parse_for()?),
                        Some(Token::If) => nodes.push(self.parse_if()?),
                        Some(Token::Set) => nodes.push(self.parse_set()?),
                        Some(t) => return Err(self.error(format!("unknown tag {:?}", t))),
                        None => return Err(self.error("unexpected end of template inside a tag")),
                    }
                }
                Some(t) => return Err(self.error(format!("unexpected {:?}", t))),
            }
        }
        Ok(nodes)
    }

    fn parse_for(&mut self) -> Result<Node, RenderError> {
        self.expect(Token::For)?;
        let mut targets = vec![self.ident("loop target")?];
        while self.eat(Token::Comma)? {
            targets.push(self.ident("loop target")?);
        }
        self.expect(Token::In)?;
        let iterable = self.parse_or()?;
        self.expect(Token::BlockEnd)?;

        let body = self.parse()?; // Recursively parse body

        let mut else_body = None;
        if self.peek(0)? == Some(Token::BlockStart) && self.peek(1)? == Some(Token::Else) {
            self.consume()?; // {%
            self.consume()?; // else
            self.expect(Token::BlockEnd)?;
            else_body = Some(self.parse()?);
        }

        // Expect endfor
        self.expect(Token::BlockStart)?;
        self.expect(Token::EndFor)?;
        self.expect(Token::BlockEnd)?;

        Ok(Node::For {
            targets,
            iterable,
            body,
            else_body,
        })
    }

    fn parse_if(&mut self) -> Result<Node, RenderError> {
        self.expect(Token::If)?;
        let condition = self.parse_expr()?;
        self.expect(Token::BlockEnd)?;

        let body = self.parse()?;
        let mut cases = vec![(condition, body)];
        let mut else_body = None;

        loop {
            // Check what comes next: {% elif ... %} or {% else %} or {% endif %}
            match self.peek(0)? {
                Some(Token::BlockStart) => match self.peek(1)? {
                    Some(Token::Elif) => {
                        self.consume()?; // {%
                        self.consume()?; // elif
                        let cond = self.parse_expr()?;
                        self.expect(Token::BlockEnd)?;
                        let block = self.parse()?;
                        cases.push((cond, block));
                    }
                    Some(Token::Else) => {
                        self.consume()?; // {%
                        self.consume()?; // else
                        self.expect(Token::BlockEnd)?;
                        else_body = Some(self.parse()?);
                        // After else, we must see endif
                        self.expect(Token::BlockStart)?;
                        self.expect(Token::EndIf)?;
                        self.expect(Token::BlockEnd)?;
                        break;
                    }
                    Some(Token::EndIf) => {
                        self.consume()?; // {%
                        self.consume()?; // endif
                        self.expect(Token::BlockEnd)?;
                        break;
                    }
                    t => {
                        return Err(self.error(format!("expected elif, else, or endif, got {:?}", t)))
                    }
                },
                None => return Err(self.error("unexpected end of template parsing if block")),
                t => {
                    return Err(self.error(format!(
                        "expected tag start for control flow, got {:?}",
                        t
                    )))
                }
            }
        }

        Ok(Node::If { cases, else_body })
    }

    fn parse_set(&mut self) -> Result<Node, RenderError> {
        self.expect(Token::Set)?;
        let target = self.ident("set target")?;
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        self.expect(Token::BlockEnd)?;
        Ok(Node::Set { target, value })
    }

    pub fn parse_expr(&mut self) -> Result<Expr, RenderError> {
        let then = self.parse_or()?;
        if self.eat(Token::If)? {
            let cond = self.parse_or()?;
            let otherwise = if self.eat(Token::Else)? {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            return Ok(Expr::Cond {
                then: Box::new(then),
                cond: Box::new(cond),
                otherwise,
            });
        }
        Ok(then)
    }

    fn parse_or(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_and()?;
        while self.eat(Token::Or)? {
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_not()?;
        while self.eat(Token::And)? {
            let rhs = self.parse_not()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, RenderError> {
        if self.eat(Token::Not)? {
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek(0)? {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::LtEq) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::GtEq) => BinOp::Ge,
                Some(Token::In) => BinOp::In,
                Some(Token::Not) if self.peek(1)? == Some(Token::In) => {
                    self.consume()?;
                    BinOp::NotIn
                }
                Some(Token::Is) => {
                    self.consume()?;
                    lhs = self.parse_test(lhs)?;
                    continue;
                }
                _ => break,
            };
            self.consume()?;
            let rhs = self.parse_add()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_test(&mut self, subject: Expr) -> Result<Expr, RenderError> {
        let negated = self.eat(Token::Not)?;
        let name = match self.consume()? {
            Some(Token::Ident(s)) => s,
            Some(Token::None) => "none".to_string(),
            Some(Token::True) => "true".to_string(),
            Some(Token::False) => "false".to_string(),
            Some(Token::In) => "in".to_string(),
            t => return Err(self.error(format!("expected test name, got {:?}", t))),
        };
        let call = match self.peek(0)? {
            Some(Token::LParen) => self.parse_call(name)?,
            Some(Token::Int(_) | Token::Float(_) | Token::StringLit(_)) => {
                let arg = self.parse_primary()?;
                Call {
                    name,
                    args: vec![arg],
                    kwargs: Vec::new(),
                }
            }
            _ => Call {
                name,
                args: Vec::new(),
                kwargs: Vec::new(),
            },
        };
        Ok(Expr::Test(Box::new(subject), call, negated))
    }

    fn parse_add(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.peek(0)? {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.consume()?;
            let rhs = self.parse_concat()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_mul()?;
        while self.eat(Token::Tilde)? {
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Concat, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.parse_unary(true)?;
        loop {
            let op = match self.peek(0)? {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.consume()?;
            let rhs = self.parse_unary(true)?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, with_filter: bool) -> Result<Expr, RenderError> {
        let mut expr = match self.peek(0)? {
            Some(Token::Minus) => {
                self.consume()?;
                Expr::UnaryOp(UnaryOp::Neg, Box::new(self.parse_unary(false)?))
            }
            Some(Token::Plus) => {
                self.consume()?;
                Expr::UnaryOp(UnaryOp::Pos, Box::new(self.parse_unary(false)?))
            }
            _ => self.parse_postfix()?,
        };
        if with_filter {
            while self.eat(Token::Pipe)? {
                let name = self.ident("filter name")?;
                let call = if self.peek(0)? == Some(Token::LParen) {
                    self.parse_call(name)?
                } else {
                    Call {
                        name,
                        args: Vec::new(),
                        kwargs: Vec::new(),
                    }
                };
                expr = Expr::Filter(Box::new(expr), call);
            }
        }
        Ok(expr)
    }

    fn parse_call(&mut self, name: String) -> Result<Call, RenderError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while self.peek(0)? != Some(Token::RParen) {
            match (self.peek(0)?, self.peek(1)?) {
                (Some(Token::Ident(key)), Some(Token::Assign)) => {
                    self.consume()?;
                    self.consume()?;
                    kwargs.push((key, self.parse_expr()?));
                }
                _ => {
                    if !kwargs.is_empty() {
                        return Err(self.error("positional argument follows keyword argument"));
                    }
                    args.push(self.parse_expr()?);
                }
            }
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(Call { name, args, kwargs })
    }

    fn parse_postfix(&mut self) -> Result<Expr, RenderError> {
        let mut expr = self.parse_primary()?;

        // Handle suffixes: .attr, ['key']
        loop {
            match self.peek(0)? {
                Some(Token::Dot) => {
                    self.consume()?; // .
                    match self.consume()? {
                        Some(Token::Ident(attr)) => {
                            expr = Expr::Attribute(Box::new(expr), attr);
                        }
                        Some(Token::Int(i)) => {
                            expr = Expr::Index(Box::new(expr), Box::new(Expr::IntLit(i)));
                        }
                        t => {
                            return Err(
                                self.error(format!("expected identifier after dot, got {:?}", t))
                            )
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.consume()?; // [
                    let idx = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Some(Token::LParen) => {
                    return Err(self.error("function calls are not supported"));
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, RenderError> {
        let expr = match self.consume()? {
            Some(Token::StringLit(s)) => Expr::StringLit(s),
            Some(Token::Int(i)) => Expr::IntLit(i),
            Some(Token::Float(f)) => Expr::FloatLit(f),
            Some(Token::True) => Expr::BoolLit(true),
            Some(Token::False) => Expr::BoolLit(false),
            Some(Token::None) => Expr::NoneLit,
            Some(Token::Ident(s)) => Expr::Var(s),
            Some(Token::LParen) => {
                let first = self.parse_expr()?;
                if self.eat(Token::Comma)? {
                    // tuple, treated as a list
                    let mut items = vec![first];
                    items.extend(self.parse_items(Token::RParen)?);
                    Expr::List(items)
                } else {
                    self.expect(Token::RParen)?;
                    first
                }
            }
            Some(Token::LBracket) => Expr::List(self.parse_items(Token::RBracket)?),
            Some(Token::LBrace) => {
                let mut pairs = Vec::new();
                while self.peek(0)? != Some(Token::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if !self.eat(Token::Comma)? {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Expr::Dict(pairs)
            }
            t => return Err(self.error(format!("expected expression, got {:?}", t))),
        };
        Ok(expr)
    }

    /// Comma separated expressions up to and including `close`.
    fn parse_items(&mut self, close: Token) -> Result<Vec<Expr>, RenderError> {
        let mut items = Vec::new();
        while self.peek(0)?.as_ref() != Some(&close) {
            items.push(self.parse_expr()?);
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }
}
