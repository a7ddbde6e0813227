use crate::language::{
    ast::{Expr, ExprKind},
    errors::SyntaxError,
    span::Span,
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::{opt, recognize},
    multi::many0,
    sequence::pair,
    IResult, Parser as NomParser,
};

pub fn is_symbol_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "_+-*/<>=!?.:$&%{}".contains(ch)
}

pub fn is_symbol(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(is_symbol_char)
        && !text.starts_with(|ch: char| ch.is_ascii_digit())
        && integer(text).map(|(rest, _)| !rest.is_empty()).unwrap_or(true)
}

fn trivia(input: &str) -> IResult<&str, ()> {
    let (input, _) = many0(alt((
        multispace1,
        recognize(pair(char(';'), not_line_ending)),
    )))
    .parse(input)?;
    Ok((input, ()))
}

fn integer(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1)).parse(input)
}

fn symbol(input: &str) -> IResult<&str, &str> {
    take_while1(is_symbol_char)(input)
}

fn open_paren(input: &str) -> IResult<&str, &str> {
    tag("(")(input)
}

pub fn parse_forms(source: &str) -> Result<Vec<Expr>, SyntaxError> {
    Reader { source }.forms()
}

struct Reader<'a> {
    source: &'a str,
}

impl<'a> Reader<'a> {
    fn offset(&self, rest: &str) -> usize {
        self.source.len() - rest.len()
    }

    fn skip(&self, input: &'a str) -> &'a str {
        trivia(input).map(|(rest, _)| rest).unwrap_or(input)
    }

    fn forms(&self) -> Result<Vec<Expr>, SyntaxError> {
        let mut forms = Vec::new();
        let mut rest = self.skip(self.source);
        while !rest.is_empty() {
            let (next, expr) = self.expr(rest)?;
            forms.push(expr);
            rest = self.skip(next);
        }
        Ok(forms)
    }

    fn expr(&self, input: &'a str) -> Result<(&'a str, Expr), SyntaxError> {
        let start = self.offset(input);
        match input.chars().next() {
            None => Err(SyntaxError::new(
                "unexpected end of input",
                Span::new(start, start),
            )),
            Some('(') => self.list(input),
            Some(')') => Err(SyntaxError::new("unexpected `)`", Span::new(start, start + 1))
                .with_help("remove the extra closing parenthesis")),
            Some('"') => self.string(input),
            Some(_) => self.atom(input),
        }
    }

    fn list(&self, input: &'a str) -> Result<(&'a str, Expr), SyntaxError> {
        let start = self.offset(input);
        let (mut rest, _) = open_paren(input)
            .map_err(|_| SyntaxError::new("expected `(`", Span::new(start, start + 1)))?;
        let mut items = Vec::new();
        loop {
            rest = self.skip(rest);
            match rest.chars().next() {
                None => {
                    return Err(SyntaxError::new("unclosed `(`", Span::new(start, start + 1))
                        .with_help("add a matching `)`"));
                }
                Some(')') => {
                    let end = self.offset(rest) + 1;
                    return Ok((&rest[1..], Expr::list(items, Span::new(start, end))));
                }
                Some(_) => {
                    let (next, item) = self.expr(rest)?;
                    items.push(item);
                    rest = next;
                }
            }
        }
    }

    fn string(&self, input: &'a str) -> Result<(&'a str, Expr), SyntaxError> {
        let start = self.offset(input);
        let mut value = String::new();
        let mut chars = input.char_indices().skip(1);
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '"' => {
                    let end = start + idx + 1;
                    return Ok((
                        &input[idx + 1..],
                        Expr::new(ExprKind::Str(value), Span::new(start, end)),
                    ));
                }
                '\\' => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '0')) => '\0',
                        Some((_, '\\')) => '\\',
                        Some((_, '"')) => '"',
                        Some((esc_idx, other)) => {
                            return Err(SyntaxError::new(
                                format!("unknown escape `\\{other}`"),
                                Span::new(start + idx, start + esc_idx + other.len_utf8()),
                            ));
                        }
                        None => break,
                    };
                    value.push(escaped);
                }
                other => value.push(other),
            }
        }
        Err(
            SyntaxError::new("unterminated string literal", Span::new(start, self.source.len()))
                .with_help("add a closing `\"`"),
        )
    }

    fn atom(&self, input: &'a str) -> Result<(&'a str, Expr), SyntaxError> {
        let start = self.offset(input);
        if let Ok((rest, digits)) = integer(input) {
            let end = start + digits.len();
            if rest.starts_with(is_symbol_char) {
                let (_, word) = symbol(input).unwrap_or((rest, digits));
                return Err(SyntaxError::new(
                    format!("invalid numeric literal `{word}`"),
                    Span::new(start, start + word.len()),
                ));
            }
            let value = digits.parse::<i64>().map_err(|err| {
                SyntaxError::new(format!("integer literal out of range: {err}"), Span::new(start, end))
            })?;
            return Ok((rest, Expr::new(ExprKind::Int(value), Span::new(start, end))));
        }
        match symbol(input) {
            Ok((rest, word)) => {
                let span = Span::new(start, start + word.len());
                let kind = match word {
                    "true" => ExprKind::Bool(true),
                    "false" => ExprKind::Bool(false),
                    _ => ExprKind::Symbol(word.to_string()),
                };
                Ok((rest, Expr::new(kind, span)))
            }
            Err(_) => {
                let ch = input.chars().next().unwrap_or(' ');
                Err(SyntaxError::new(
                    format!("unexpected character `{ch}`"),
                    Span::new(start, start + ch.len_utf8()),
                ))
            }
        }
    }
}
