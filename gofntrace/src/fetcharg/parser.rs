//! Statement parser: `addressing-expr:type` → [`ArgumentFetchSpec`]

use super::{AddressingRule, ArgumentFetchSpec, Register, ScalarType};
use crate::domain::FetchArgError;

pub(super) fn parse_statement(name: &str, statement: &str) -> Result<ArgumentFetchSpec, FetchArgError> {
    let mut parts = statement.split(':');
    let (Some(expr), Some(type_code), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(FetchArgError::MissingType(statement.to_string()));
    };

    let scalar_type: ScalarType = type_code.trim().parse()?;
    let rule_chain = parse_expression(expr.trim())?;

    Ok(ArgumentFetchSpec {
        name: name.to_string(),
        statement: statement.to_string(),
        rule_chain,
        scalar_type,
    })
}

/// Parse a nested addressing expression into rules in computation order.
///
/// Two passes:
/// 1. Split the text into terms at every parenthesis while tracking the
///    nesting balance. Terms come out in textual order, outermost first:
///    `(*+0(+8(%ax)))` yields `*+0`, `+8`, `%ax`.
/// 2. Reverse the list. The innermost term is the base the outer terms are
///    applied to, so reversing restores computation order:
///    `%ax`, `+8`, `*+0`.
fn parse_expression(expr: &str) -> Result<Vec<AddressingRule>, FetchArgError> {
    let unbalanced = || FetchArgError::UnbalancedExpression(expr.to_string());

    let mut terms: Vec<&str> = Vec::new();
    let mut balance: usize = 0;
    let mut term_start = 0;

    for (idx, ch) in expr.char_indices() {
        match ch {
            '(' => balance += 1,
            ')' => balance = balance.checked_sub(1).ok_or_else(unbalanced)?,
            _ => continue,
        }
        push_term(&mut terms, &expr[term_start..idx]);
        term_start = idx + 1;
    }
    if balance != 0 {
        return Err(unbalanced());
    }
    push_term(&mut terms, &expr[term_start..]);

    if terms.is_empty() {
        return Err(FetchArgError::EmptyExpression(expr.to_string()));
    }

    let mut rules = terms.into_iter().map(parse_term).collect::<Result<Vec<_>, _>>()?;
    rules.reverse();
    Ok(rules)
}

fn push_term<'a>(terms: &mut Vec<&'a str>, raw: &'a str) {
    let term = raw.trim();
    if !term.is_empty() {
        terms.push(term);
    }
}

fn parse_term(term: &str) -> Result<AddressingRule, FetchArgError> {
    if let Some(register) = term.strip_prefix('%') {
        return Ok(AddressingRule::register(register.parse::<Register>()?));
    }

    let (dereference, offset) = match term.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, term),
    };
    let offset: i64 = offset.parse().map_err(|_| FetchArgError::InvalidOffset(term.to_string()))?;
    Ok(AddressingRule::offset(offset, dereference))
}
