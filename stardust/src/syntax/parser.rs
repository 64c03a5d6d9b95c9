use codespan_reporting::diagnostic::{Diagnostic, Label};
use itertools::Itertools;
use thiserror::Error;

use crate::source::{BytePos, ByteRange, FileId};
use crate::syntax::lexer::{self, Spanned, Token};
use crate::syntax::{
    BinOp, Block, Expr, File, Function, FunctionKind, Global, Import, Param, Stmt, TypeName, UnOp,
    Vertex,
};
use crate::types::{Value, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("{}", .0.message())]
    Lexer(lexer::Error),
    #[error("unexpected token `{found}`")]
    UnexpectedToken {
        range: ByteRange,
        found: String,
        expected: Vec<&'static str>,
    },
    #[error("unexpected end of file")]
    UnexpectedEof {
        range: ByteRange,
        expected: Vec<&'static str>,
    },
    #[error("invalid literal")]
    InvalidLiteral { range: ByteRange, reason: &'static str },
}

impl From<lexer::Error> for ParseError {
    fn from(error: lexer::Error) -> ParseError {
        ParseError::Lexer(error)
    }
}

impl ParseError {
    pub fn range(&self) -> ByteRange {
        match self {
            ParseError::Lexer(error) => error.range(),
            ParseError::UnexpectedToken { range, .. }
            | ParseError::UnexpectedEof { range, .. }
            | ParseError::InvalidLiteral { range, .. } => *range,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            ParseError::Lexer(error) => error.to_diagnostic(),
            ParseError::UnexpectedToken { range, expected, .. }
            | ParseError::UnexpectedEof { range, expected } => Diagnostic::error()
                .with_message(self.to_string())
                .with_labels(vec![Label::primary(range.file_id(), *range)
                    .with_message("unexpected token")])
                .with_notes(format_expected(expected).map_or(Vec::new(), |message| vec![message])),
            ParseError::InvalidLiteral { range, reason } => Diagnostic::error()
                .with_message(self.to_string())
                .with_labels(vec![Label::primary(range.file_id(), *range).with_message(*reason)]),
        }
    }
}

fn format_expected(expected: &[&str]) -> Option<String> {
    expected.split_last().map(|items| match items {
        (last, []) => format!("expected {last}"),
        (last, expected) => format!("expected {} or {last}", expected.iter().format(", ")),
    })
}

/// Parse a source file into blocks.
pub fn parse_file(file_id: FileId, source: &str) -> Result<File, ParseError> {
    let mut parser = Parser::new(file_id, source)?;
    let mut blocks = Vec::new();
    while parser.peek().is_some() {
        blocks.push(parser.block()?);
    }
    Ok(File { blocks })
}

/// Parse a single expression, consuming all of `source`.
pub fn parse_expression(file_id: FileId, source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(file_id, source)?;
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(_) => Err(parser.unexpected(&["end of expression"])),
    }
}

struct Parser<'source> {
    file_id: FileId,
    tokens: Vec<Spanned<Token<'source>, BytePos>>,
    position: usize,
    eof: BytePos,
}

impl<'source> Parser<'source> {
    fn new(file_id: FileId, source: &'source str) -> Result<Parser<'source>, ParseError> {
        let tokens = lexer::tokens(file_id, source).collect::<Result<Vec<_>, _>>()?;
        Ok(Parser {
            file_id,
            tokens,
            position: 0,
            eof: source.len() as BytePos,
        })
    }

    fn peek(&self) -> Option<&Token<'source>> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token<'source>> {
        self.tokens.get(self.position + n).map(|(_, token, _)| token)
    }

    fn range(&self, start: BytePos, end: BytePos) -> ByteRange {
        ByteRange::new(self.file_id, start, end)
    }

    /// The range of the next token, or an empty range at the end of the file.
    fn next_range(&self) -> ByteRange {
        match self.tokens.get(self.position) {
            Some((start, _, end)) => self.range(*start, *end),
            None => self.range(self.eof, self.eof),
        }
    }

    fn last_end(&self) -> BytePos {
        match self.position.checked_sub(1) {
            Some(index) => self.tokens[index].2,
            None => 0,
        }
    }

    /// Extend a range from `start` to the end of the last consumed token.
    fn range_from(&self, start: ByteRange) -> ByteRange {
        self.range(start.start(), self.last_end().max(start.end()))
    }

    fn advance(&mut self) -> Option<(ByteRange, Token<'source>)> {
        let (start, token, end) = self.tokens.get(self.position)?.clone();
        self.position += 1;
        Some((self.range(start, end), token))
    }

    fn unexpected(&self, expected: &[&'static str]) -> ParseError {
        let range = self.next_range();
        match self.peek() {
            Some(token) => ParseError::UnexpectedToken {
                range,
                found: token_text(token).to_owned(),
                expected: expected.to_vec(),
            },
            None => ParseError::UnexpectedEof {
                range,
                expected: expected.to_vec(),
            },
        }
    }

    fn eat(&mut self, token: Token<'source>) -> Option<ByteRange> {
        match self.peek() {
            Some(next) if *next == token => self.advance().map(|(range, _)| range),
            _ => None,
        }
    }

    fn expect(&mut self, token: Token<'source>) -> Result<ByteRange, ParseError> {
        let description = token.description();
        self.eat(token).ok_or_else(|| self.unexpected(&[description]))
    }

    fn name(&mut self) -> Result<(ByteRange, String), ParseError> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = (*name).to_owned();
                let (range, _) = self.advance().ok_or_else(|| self.unexpected(&["name"]))?;
                Ok((range, name))
            }
            _ => Err(self.unexpected(&["name"])),
        }
    }

    fn type_name(&mut self) -> Result<TypeName, ParseError> {
        let (range, name) = self.name()?;
        Ok(TypeName { range, name })
    }

    /// Parse a comma separated list up to and including `close`, allowing a
    /// trailing comma.
    fn list<T>(
        &mut self,
        close: Token<'source>,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close.clone()).is_some() {
                return Ok(items);
            }
            items.push(item(self)?);
            if self.eat(Token::Comma).is_none() {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        match self.peek() {
            Some(Token::KeywordMark) => self.function(FunctionKind::Mark).map(Block::Function),
            Some(Token::KeywordShader) => self.function(FunctionKind::Shader).map(Block::Function),
            Some(Token::KeywordFunction) => (self.function(FunctionKind::Function)).map(Block::Function),
            Some(Token::KeywordGlobal) => self.global().map(Block::Global),
            Some(Token::KeywordImport) => self.import().map(Block::Import),
            _ => Err(self.unexpected(&["mark", "shader", "function", "global", "import"])),
        }
    }

    fn function(&mut self, kind: FunctionKind) -> Result<Function, ParseError> {
        let start = self.next_range();
        self.advance();
        let (_, name) = self.name()?;
        self.expect(Token::OpenParen)?;
        let params = self.list(Token::CloseParen, Self::param)?;
        let return_type = match self.eat(Token::Colon) {
            Some(_) => Some(self.type_name()?),
            None => None,
        };
        let body = self.braced_stmts()?;
        Ok(Function {
            range: self.range_from(start),
            kind,
            name,
            params,
            return_type,
            body,
        })
    }

    fn param(&mut self) -> Result<Param, ParseError> {
        let (start, name) = self.name()?;
        self.expect(Token::Colon)?;
        let r#type = self.type_name()?;
        let default = self.default()?;
        Ok(Param {
            range: self.range_from(start),
            name,
            r#type,
            default,
        })
    }

    fn default(&mut self) -> Result<Option<Value>, ParseError> {
        match self.eat(Token::Equals) {
            Some(_) => Ok(Some(self.literal()?.1)),
            None => Ok(None),
        }
    }

    fn global(&mut self) -> Result<Global, ParseError> {
        let start = self.next_range();
        self.advance();
        let (_, name) = self.name()?;
        self.expect(Token::Colon)?;
        let r#type = self.type_name()?;
        let default = self.default()?;
        self.expect(Token::Semicolon)?;
        Ok(Global {
            range: self.range_from(start),
            name,
            r#type,
            default,
        })
    }

    fn import(&mut self) -> Result<Import, ParseError> {
        let start = self.next_range();
        self.advance();
        let names = match self.peek() {
            Some(Token::OpenBrace) => {
                self.advance();
                let names = self.list(Token::CloseBrace, Self::name)?;
                self.expect(Token::KeywordFrom)?;
                Some(names)
            }
            Some(Token::Name(_)) if self.peek_nth(1) == Some(&Token::KeywordFrom) => {
                let name = self.name()?;
                self.advance();
                Some(vec![name])
            }
            _ => None,
        };
        let (_, module) = self.name()?;
        self.expect(Token::Semicolon)?;
        Ok(Import {
            range: self.range_from(start),
            module,
            names,
        })
    }

    fn braced_stmts(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Token::OpenBrace)?;
        let mut stmts = Vec::new();
        while self.eat(Token::CloseBrace).is_none() {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.next_range();
        match self.peek() {
            Some(Token::OpenBrace) => {
                let stmts = self.braced_stmts()?;
                Ok(Stmt::Block(self.range_from(start), stmts))
            }
            Some(Token::KeywordLet) => {
                self.advance();
                let (_, name) = self.name()?;
                let r#type = match self.eat(Token::Colon) {
                    Some(_) => Some(self.type_name()?),
                    None => None,
                };
                let init = match self.eat(Token::Equals) {
                    Some(_) => Some(self.expr()?),
                    None => None,
                };
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Let(self.range_from(start), name, r#type, init))
            }
            Some(Token::KeywordReturn) => {
                self.advance();
                let expr = self.expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Return(self.range_from(start), expr))
            }
            Some(Token::KeywordDiscard) => {
                self.advance();
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Discard(self.range_from(start)))
            }
            Some(Token::KeywordEmit) => {
                self.advance();
                let vertices = match self.peek() {
                    Some(Token::OpenBracket) => {
                        self.advance();
                        self.list(Token::CloseBracket, Self::vertex)?
                    }
                    _ => vec![self.vertex()?],
                };
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Emit(self.range_from(start), vertices))
            }
            Some(Token::KeywordFor) => {
                self.advance();
                let parenthesized = self.eat(Token::OpenParen).is_some();
                let (_, var) = self.name()?;
                self.expect(Token::KeywordIn)?;
                let start_bound = self.integer()?;
                self.expect(Token::FullStopFullStop)?;
                let end_bound = self.integer()?;
                if parenthesized {
                    self.expect(Token::CloseParen)?;
                }
                let body = self.stmt()?;
                Ok(Stmt::For {
                    range: self.range_from(start),
                    var,
                    start: start_bound,
                    end: end_bound,
                    body: Box::new(body),
                })
            }
            Some(Token::KeywordIf) => {
                self.advance();
                let mut branches = vec![(self.expr()?, self.stmt()?)];
                let mut otherwise = None;
                while self.eat(Token::KeywordElse).is_some() {
                    if self.eat(Token::KeywordIf).is_some() {
                        branches.push((self.expr()?, self.stmt()?));
                    } else {
                        otherwise = Some(Box::new(self.stmt()?));
                        break;
                    }
                }
                Ok(Stmt::If {
                    range: self.range_from(start),
                    branches,
                    otherwise,
                })
            }
            Some(Token::Name(_)) if self.peek_nth(1) == Some(&Token::Equals) => {
                let (_, name) = self.name()?;
                self.advance();
                let expr = self.expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Assign(self.range_from(start), name, expr))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn vertex(&mut self) -> Result<Vertex, ParseError> {
        self.expect(Token::OpenBrace)?;
        self.list(Token::CloseBrace, |parser| {
            let (range, name) = parser.name()?;
            parser.expect(Token::Colon)?;
            Ok((range, name, parser.expr()?))
        })
    }

    fn integer(&mut self) -> Result<i64, ParseError> {
        let start = self.next_range();
        match self.literal()? {
            (ValueType::Int, Value::Scalar(value)) => Ok(value as i64),
            _ => Err(ParseError::InvalidLiteral {
                range: self.range_from(start),
                reason: "loop bounds must be integer literals",
            }),
        }
    }

    /// Parse a constant: a possibly negated number, a boolean, or a vector
    /// of numbers.
    fn literal(&mut self) -> Result<(ValueType, Value), ParseError> {
        let start = self.next_range();
        match self.peek() {
            Some(Token::KeywordTrue) => {
                self.advance();
                Ok((ValueType::Bool, Value::from_bool(true)))
            }
            Some(Token::KeywordFalse) => {
                self.advance();
                Ok((ValueType::Bool, Value::from_bool(false)))
            }
            Some(Token::OpenBracket) => {
                self.advance();
                let components = self.list(Token::CloseBracket, |parser| parser.number())?;
                let range = self.range_from(start);
                let r#type = match components.len() {
                    2 => ValueType::Vector2,
                    3 => ValueType::Vector3,
                    4 => ValueType::Vector4,
                    _ => {
                        return Err(ParseError::InvalidLiteral {
                            range,
                            reason: "vectors have between 2 and 4 components",
                        })
                    }
                };
                let components = components.into_iter().map(|(_, value)| value).collect();
                Ok((r#type, Value::Vector(components)))
            }
            _ => {
                let (r#type, value) = self.number()?;
                Ok((r#type, Value::Scalar(value)))
            }
        }
    }

    fn number(&mut self) -> Result<(ValueType, f64), ParseError> {
        let negative = self.eat(Token::Minus).is_some();
        let sign = if negative { -1.0 } else { 1.0 };
        let (r#type, text) = match self.peek() {
            Some(Token::IntLiteral(text)) => (ValueType::Int, *text),
            Some(Token::FloatLiteral(text)) => (ValueType::Float, *text),
            _ => return Err(self.unexpected(&["number"])),
        };
        let range = self.next_range();
        self.advance();
        let value = match r#type {
            ValueType::Int => text.parse::<i32>().map(f64::from).ok(),
            _ => text.parse::<f64>().ok(),
        };
        match value {
            Some(value) => Ok((r#type, sign * value)),
            None => Err(ParseError::InvalidLiteral {
                range,
                reason: "number out of range",
            }),
        }
    }

    pub fn expr(&mut self) -> Result<Expr, ParseError> {
        self.binary(0)
    }

    fn binary(&mut self, precedence: usize) -> Result<Expr, ParseError> {
        const LEVELS: &[&[(Token<'static>, BinOp)]] = &[
            &[(Token::PipePipe, BinOp::Or)],
            &[(Token::AmpersandAmpersand, BinOp::And)],
            &[(Token::EqualsEquals, BinOp::Eq), (Token::BangEquals, BinOp::Neq)],
            &[
                (Token::Less, BinOp::Lt),
                (Token::LessEquals, BinOp::Lte),
                (Token::Greater, BinOp::Gt),
                (Token::GreaterEquals, BinOp::Gte),
            ],
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            &[
                (Token::Star, BinOp::Mul),
                (Token::ForwardSlash, BinOp::Div),
                (Token::Percent, BinOp::Rem),
            ],
        ];

        let Some(operators) = LEVELS.get(precedence) else {
            return self.unary();
        };
        let mut lhs = self.binary(precedence + 1)?;
        loop {
            let op = operators
                .iter()
                .find(|(token, _)| self.peek() == Some(token))
                .map(|(_, op)| *op);
            let Some(op) = op else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = self.binary(precedence + 1)?;
            let range = lhs.range().merge(rhs.range());
            lhs = Expr::BinOp(range, Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Plus) => UnOp::Pos,
            Some(Token::Bang) => UnOp::Not,
            _ => return self.postfix(),
        };
        let start = self.next_range();
        self.advance();
        let expr = self.unary()?;
        Ok(Expr::UnOp(start.merge(expr.range()), op, Box::new(expr)))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.eat(Token::FullStop).is_some() {
            let (range, field) = self.name()?;
            expr = Expr::Field(expr.range().merge(range), Box::new(expr), field);
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.next_range();
        match self.peek() {
            Some(Token::OpenParen) => {
                self.advance();
                let expr = self.expr()?;
                self.expect(Token::CloseParen)?;
                Ok(expr)
            }
            Some(Token::Name(_)) => {
                let (range, name) = self.name()?;
                if self.eat(Token::OpenParen).is_none() {
                    return Ok(Expr::Name(range, name));
                }
                let (args, kwargs) = self.arguments()?;
                Ok(Expr::Call(self.range_from(start), name, args, kwargs))
            }
            Some(
                Token::IntLiteral(_)
                | Token::FloatLiteral(_)
                | Token::KeywordTrue
                | Token::KeywordFalse
                | Token::OpenBracket,
            ) => {
                let (r#type, value) = self.literal()?;
                Ok(Expr::Literal(self.range_from(start), value, r#type))
            }
            _ => Err(self.unexpected(&["expression"])),
        }
    }

    /// Parse call arguments after the opening parenthesis. Keyword arguments
    /// must follow all positional arguments.
    fn arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        loop {
            if self.eat(Token::CloseParen).is_some() {
                return Ok((args, kwargs));
            }
            match (self.peek(), self.peek_nth(1)) {
                (Some(Token::Name(_)), Some(Token::Equals)) => {
                    let (_, name) = self.name()?;
                    self.advance();
                    kwargs.push((name, self.expr()?));
                }
                _ if !kwargs.is_empty() => return Err(self.unexpected(&["keyword argument"])),
                _ => args.push(self.expr()?),
            }
            if self.eat(Token::Comma).is_none() {
                self.expect(Token::CloseParen)?;
                return Ok((args, kwargs));
            }
        }
    }
}

fn token_text<'a>(token: &'a Token<'_>) -> &'a str {
    match token {
        Token::Name(text) | Token::IntLiteral(text) | Token::FloatLiteral(text) => text,
        token => token.description(),
    }
}
