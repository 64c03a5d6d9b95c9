use codespan_reporting::diagnostic::{Diagnostic, Label};
use logos::{Filter, Logos};

use crate::source::{BytePos, ByteRange, FileId};

pub const KEYWORDS: &[&str] = &[
    "discard", "else", "emit", "false", "for", "from", "function", "global", "if", "import", "in",
    "let", "mark", "return", "shader", "true",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|keyword| word == *keyword)
}

#[derive(Clone, Debug, PartialEq, Logos)]
#[logos(extras = FileId)]
pub enum Token<'source> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name(&'source str),
    #[regex(r"[0-9]+")]
    IntLiteral(&'source str),
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    FloatLiteral(&'source str),

    #[token("discard")]
    KeywordDiscard,
    #[token("else")]
    KeywordElse,
    #[token("emit")]
    KeywordEmit,
    #[token("false")]
    KeywordFalse,
    #[token("for")]
    KeywordFor,
    #[token("from")]
    KeywordFrom,
    #[token("function")]
    KeywordFunction,
    #[token("global")]
    KeywordGlobal,
    #[token("if")]
    KeywordIf,
    #[token("import")]
    KeywordImport,
    #[token("in")]
    KeywordIn,
    #[token("let")]
    KeywordLet,
    #[token("mark")]
    KeywordMark,
    #[token("return")]
    KeywordReturn,
    #[token("shader")]
    KeywordShader,
    #[token("true")]
    KeywordTrue,

    #[token("&&")]
    AmpersandAmpersand,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEquals,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("==")]
    EqualsEquals,
    #[token(">=")]
    GreaterEquals,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEquals,
    #[token("<")]
    Less,
    #[token(".")]
    FullStop,
    #[token("..")]
    FullStopFullStop,
    #[token("/")]
    ForwardSlash,
    #[token("-")]
    Minus,
    #[token("%")]
    Percent,
    #[token("||")]
    PipePipe,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("*")]
    Star,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,

    #[token(r"/*", block_comment)]
    BlockComment(UnclosedComment),

    #[error]
    #[regex(r"\p{Whitespace}", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

const OPEN: &str = "/*";
const CLOSE: &str = "*/";

/// Skip a block comment, which may contain nested block comments.
fn block_comment<'source>(
    lexer: &mut logos::Lexer<'source, Token<'source>>,
) -> Filter<UnclosedComment> {
    let mut open = vec![lexer.span().start as BytePos];
    while !open.is_empty() {
        let rest = lexer.remainder();
        if rest.starts_with(OPEN) {
            open.push(lexer.span().end as BytePos);
            lexer.bump(OPEN.len());
        } else if rest.starts_with(CLOSE) {
            open.pop();
            lexer.bump(CLOSE.len());
        } else if let Some(c) = rest.chars().next() {
            lexer.bump(c.len_utf8());
        } else {
            break;
        }
    }

    let file_id = lexer.extras;
    let opening = |start: BytePos| ByteRange::new(file_id, start, start + OPEN.len() as BytePos);
    let mut open = open.into_iter().map(opening);
    match open.next() {
        None => Filter::Skip,
        Some(outermost) => Filter::Emit(UnclosedComment {
            outermost,
            nested: open.collect(),
        }),
    }
}

pub type Spanned<Tok, Loc> = (Loc, Tok, Loc);

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    UnclosedComment(UnclosedComment),
    UnexpectedCharacter { range: ByteRange },
}

/// A block comment still open at the end of the source.
#[derive(Clone, Debug, PartialEq)]
pub struct UnclosedComment {
    outermost: ByteRange,
    /// Nested openings that were not closed either, outermost first.
    nested: Vec<ByteRange>,
}

impl UnclosedComment {
    /// The number of `*/` missing from the source.
    pub fn missing_closes(&self) -> usize {
        self.nested.len() + 1
    }
}

impl Error {
    pub fn range(&self) -> ByteRange {
        match self {
            Error::UnclosedComment(comment) => comment.outermost,
            Error::UnexpectedCharacter { range } => *range,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Error::UnclosedComment(_) => "block comment is never closed",
            Error::UnexpectedCharacter { .. } => "unexpected character",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let diagnostic = Diagnostic::error().with_message(self.message());
        let Error::UnclosedComment(comment) = self else {
            let range = self.range();
            return diagnostic.with_labels(vec![Label::primary(range.file_id(), range)]);
        };

        let outermost = Label::primary(comment.outermost.file_id(), comment.outermost)
            .with_message(format!("comment opened with `{OPEN}` here"));
        let nested = (comment.nested.iter())
            .map(|range| Label::secondary(range.file_id(), *range).with_message("nested comment opened here"));
        let note = match comment.missing_closes() {
            1 => format!("close the comment with `{CLOSE}`"),
            count => format!("comments nest, so {count} `{CLOSE}` are needed to close them all"),
        };
        (diagnostic.with_labels(std::iter::once(outermost).chain(nested).collect()))
            .with_notes(vec![note])
    }
}

pub fn tokens(
    file_id: FileId,
    source: &str,
) -> impl Iterator<Item = Result<Spanned<Token<'_>, BytePos>, Error>> {
    assert!(
        source.len() <= u32::MAX as usize,
        "`source` must be less than 4GiB in length"
    );

    Token::lexer_with_extras(source, file_id)
        .spanned()
        .map(move |(token, range)| {
            let start = range.start as BytePos;
            let end = range.end as BytePos;
            match token {
                Token::BlockComment(comment) => Err(Error::UnclosedComment(comment)),
                Token::Error => Err(Error::UnexpectedCharacter {
                    range: ByteRange::new(file_id, start, end),
                }),
                token => Ok((start, token, end)),
            }
        })
}

impl<'source> Token<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Token::Name(_) => "name",
            Token::IntLiteral(_) => "integer literal",
            Token::FloatLiteral(_) => "float literal",
            Token::KeywordDiscard => "discard",
            Token::KeywordElse => "else",
            Token::KeywordEmit => "emit",
            Token::KeywordFalse => "false",
            Token::KeywordFor => "for",
            Token::KeywordFrom => "from",
            Token::KeywordFunction => "function",
            Token::KeywordGlobal => "global",
            Token::KeywordIf => "if",
            Token::KeywordImport => "import",
            Token::KeywordIn => "in",
            Token::KeywordLet => "let",
            Token::KeywordMark => "mark",
            Token::KeywordReturn => "return",
            Token::KeywordShader => "shader",
            Token::KeywordTrue => "true",
            Token::AmpersandAmpersand => "&&",
            Token::Bang => "!",
            Token::BangEquals => "!=",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Equals => "=",
            Token::EqualsEquals => "==",
            Token::GreaterEquals => ">=",
            Token::Greater => ">",
            Token::LessEquals => "<=",
            Token::Less => "<",
            Token::FullStop => ".",
            Token::FullStopFullStop => "..",
            Token::ForwardSlash => "/",
            Token::Minus => "-",
            Token::Percent => "%",
            Token::PipePipe => "||",
            Token::Plus => "+",
            Token::Semicolon => ";",
            Token::Star => "*",
            Token::OpenBrace => "{",
            Token::CloseBrace => "}",
            Token::OpenBracket => "[",
            Token::CloseBracket => "]",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::BlockComment(_) => "block comment",
            Token::Error => "error",
        }
    }
}
