use std::{rc::Rc, result::Result};

use pest::{
    error::{Error, ErrorVariant},
    iterators::{Pair, Pairs},
    Parser, Span,
};

use crate::syntax::tree::{Fixity, FunctionDef, Token};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
pub struct GrimParser;

pub type ParseError = Error<Rule>;

#[derive(Debug)]
pub struct CompileError(pub ParseError);

impl GrimParser {
    pub fn tokens(input: &str) -> Result<Vec<Token>, CompileError> {
        let pairs = GrimParser::parse(Rule::program, input).map_err(CompileError)?;
        parse_program(pairs)
    }
}

fn parse_program(pairs: Pairs<Rule>) -> Result<Vec<Token>, CompileError> {
    pairs
        .into_iter()
        .flat_map(|item| item.into_inner())
        .filter(|node| node.as_rule() != Rule::EOI)
        .map(parse_token)
        .collect()
}

fn parse_token(pair: Pair<Rule>) -> Result<Token, CompileError> {
    match pair.as_rule() {
        Rule::delimiter => Ok(Token::Delimiter),
        Rule::name => Ok(Token::Var(pair.as_str().to_owned())),
        Rule::string => {
            let inner = pair.into_inner().next().unwrap();
            Ok(Token::Str(unescape(inner.as_str())))
        }
        Rule::group => Ok(Token::Group(parse_token_list(pair.into_inner())?)),
        Rule::call => parse_call(pair),
        Rule::fundef => parse_fundef(pair),
        rule => unreachable!("token rule expected, got {:?}", rule),
    }
}

fn parse_token_list(pairs: Pairs<Rule>) -> Result<Vec<Token>, CompileError> {
    pairs.map(parse_token).collect()
}

fn parse_call(pair: Pair<Rule>) -> Result<Token, CompileError> {
    let mut inner = pair.into_inner();
    let callee = parse_token(inner.next().unwrap())?;
    inner.try_fold(callee, |callee, args| {
        Ok(Token::Call(
            Box::new(callee),
            parse_token_list(args.into_inner())?,
        ))
    })
}

fn parse_fundef(pair: Pair<Rule>) -> Result<Token, CompileError> {
    let def = pair.into_inner().next().unwrap();
    let span = def.as_span();

    let mut fixity = Fixity::General;
    let mut priority: i64 = 0;
    let mut params = Vec::new();
    let mut body = Vec::new();

    for item in def.into_inner() {
        match item.as_rule() {
            Rule::kw_fun | Rule::kw_end => (),
            Rule::op_kw => {
                fixity = match item.as_str() {
                    "opp" => Fixity::Prefix,
                    "opm" => Fixity::Mid,
                    "ops" => Fixity::Suffix,
                    kw => unreachable!("operator keyword expected, got {}", kw),
                };
            }
            Rule::priority => {
                priority = item
                    .as_str()
                    .parse()
                    .ok()
                    .filter(|p: &i64| p.unsigned_abs() <= u64::from(u32::MAX))
                    .ok_or_else(|| custom_error(item.as_span(), "operator priority out of range"))?;
            }
            Rule::params => {
                for name in item.into_inner() {
                    let name = name.as_str().to_owned();
                    if params.contains(&name) {
                        return Err(custom_error(span, "duplicate parameter name"));
                    }
                    params.push(name);
                }
            }
            _ => body.push(parse_token(item)?),
        }
    }

    match fixity {
        Fixity::Prefix | Fixity::Suffix if params.len() != 1 => {
            return Err(custom_error(
                span,
                "prefix and suffix operators take exactly one parameter",
            ));
        }
        Fixity::Mid if params.len() != 2 => {
            return Err(custom_error(span, "mid operators take exactly two parameters"));
        }
        _ => (),
    }

    Ok(Token::Fun(Rc::new(FunctionDef {
        fixity,
        params,
        body,
        priority: priority.unsigned_abs() as u32,
        left_assoc: priority < 0,
    })))
}

fn custom_error(span: Span, message: &str) -> CompileError {
    CompileError(Error::new_from_span(
        ErrorVariant::CustomError {
            message: message.to_owned(),
        },
        span,
    ))
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some(ch) => out.push(ch),
            None => (),
        }
    }
    out
}
