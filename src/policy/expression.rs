use super::context::{JobContext, Scalar};
use super::error::PolicyError;
use pest::iterators::Pair;
use pest::Parser;
use regex::Regex;
use std::str::FromStr;

mod grammar {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "policy/rule.pest"]
    pub(super) struct RuleParser;
}

use grammar::{Rule, RuleParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Scalar),
    Path(String),
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Compare(Box<Expression>, Comparison, Box<Expression>),
    Call(Function, Box<Expression>, Box<Expression>),
    Exists(String),
}

impl FromStr for Expression {
    type Err = PolicyError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let parse_error = |message: String| PolicyError::Parse {
            rule: source.to_string(),
            message,
        };
        let parsed = RuleParser::parse(Rule::rule, source)
            .map_err(|err| parse_error(err.to_string()))?
            .next()
            .ok_or_else(|| parse_error("empty rule".to_string()))?;
        let expression = parsed
            .into_inner()
            .next()
            .ok_or_else(|| parse_error("empty rule".to_string()))?;
        build(expression).map_err(parse_error)
    }
}

fn first(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>, String> {
    let kind = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| format!("empty {kind:?}"))
}

fn build(pair: Pair<'_, Rule>) -> Result<Expression, String> {
    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr => {
            let or = pair.as_rule() == Rule::or_expr;
            let mut operands = pair.into_inner().map(build);
            let head = operands.next().ok_or("missing operand")??;
            operands.try_fold(head, |left, right| {
                let (left, right) = (Box::new(left), Box::new(right?));
                Ok(if or {
                    Expression::Or(left, right)
                } else {
                    Expression::And(left, right)
                })
            })
        }
        Rule::unary => {
            let mut nots = 0;
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::not_op => nots += 1,
                    _ => operand = Some(build(inner)?),
                }
            }
            let operand = operand.ok_or("missing operand")?;
            Ok((0..nots).fold(operand, |expression, _| {
                Expression::Not(Box::new(expression))
            }))
        }
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let left = build(inner.next().ok_or("missing operand")?)?;
            let Some(operator) = inner.next() else {
                return Ok(left);
            };
            let right = build(inner.next().ok_or("missing right operand")?)?;
            let operator = match operator.as_str() {
                "==" => Comparison::Eq,
                "!=" => Comparison::Ne,
                "<" => Comparison::Lt,
                "<=" => Comparison::Le,
                ">" => Comparison::Gt,
                ">=" => Comparison::Ge,
                "=~" => Comparison::Matches,
                other => return Err(format!("unknown operator `{other}`")),
            };
            if let (Comparison::Matches, Expression::Literal(Scalar::String(pattern))) =
                (operator, &right)
            {
                Regex::new(pattern).map_err(|err| err.to_string())?;
            }
            Ok(Expression::Compare(Box::new(left), operator, Box::new(right)))
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or("missing function")?.as_str().to_string();
            let arguments = inner.map(build).collect::<Result<Vec<_>, _>>()?;
            call(&name, arguments)
        }
        Rule::string => {
            let quoted = first(pair)?;
            Ok(Expression::Literal(Scalar::String(match quoted.as_rule() {
                Rule::single_quoted => quoted.as_str().replace("''", "'"),
                _ => quoted.as_str().to_string(),
            })))
        }
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(|number| Expression::Literal(Scalar::Number(number)))
            .map_err(|err| err.to_string()),
        Rule::boolean => Ok(Expression::Literal(Scalar::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Expression::Literal(Scalar::Null)),
        Rule::path => Ok(Expression::Path(pair.as_str().to_string())),
        other => Err(format!("unexpected {other:?}")),
    }
}

fn call(name: &str, arguments: Vec<Expression>) -> Result<Expression, String> {
    let function = match name {
        "exists" => {
            return match <[Expression; 1]>::try_from(arguments) {
                Ok([Expression::Path(path)]) => Ok(Expression::Exists(path)),
                _ => Err("exists takes a single path".to_string()),
            }
        }
        "contains" => Function::Contains,
        "startsWith" => Function::StartsWith,
        "endsWith" => Function::EndsWith,
        other => return Err(format!("unknown function `{other}`")),
    };
    let [haystack, needle] = <[Expression; 2]>::try_from(arguments)
        .map_err(|_| format!("{name} takes two arguments"))?;
    Ok(Expression::Call(function, Box::new(haystack), Box::new(needle)))
}

impl Expression {
    pub fn evaluate(&self, context: &JobContext) -> Result<Scalar, PolicyError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Path(path) => Ok(context.get(path)),
            Expression::Exists(path) => Ok(Scalar::Bool(context.exists(path))),
            Expression::Not(operand) => Ok(Scalar::Bool(!boolean(operand.evaluate(context)?)?)),
            Expression::And(left, right) => Ok(Scalar::Bool(
                boolean(left.evaluate(context)?)? && boolean(right.evaluate(context)?)?,
            )),
            Expression::Or(left, right) => Ok(Scalar::Bool(
                boolean(left.evaluate(context)?)? || boolean(right.evaluate(context)?)?,
            )),
            Expression::Compare(left, operator, right) => {
                compare(left.evaluate(context)?, *operator, right.evaluate(context)?)
                    .map(Scalar::Bool)
            }
            Expression::Call(function, haystack, needle) => {
                let result = match (haystack.evaluate(context)?, needle.evaluate(context)?) {
                    (Scalar::Null, _) => false,
                    (Scalar::String(haystack), Scalar::String(needle)) => match function {
                        Function::Contains => haystack.contains(&needle),
                        Function::StartsWith => haystack.starts_with(&needle),
                        Function::EndsWith => haystack.ends_with(&needle),
                    },
                    (haystack, needle) => {
                        return Err(PolicyError::Type(format!(
                            "{function:?} expects strings, got {haystack} and {needle}"
                        )))
                    }
                };
                Ok(Scalar::Bool(result))
            }
        }
    }
}

fn boolean(value: Scalar) -> Result<bool, PolicyError> {
    match value {
        Scalar::Bool(value) => Ok(value),
        other => Err(PolicyError::Type(format!("expected a boolean, got {other}"))),
    }
}

fn compare(left: Scalar, operator: Comparison, right: Scalar) -> Result<bool, PolicyError> {
    use std::cmp::Ordering;

    let ordering = |left: &Scalar, right: &Scalar| -> Result<Ordering, PolicyError> {
        match (left, right) {
            (Scalar::Number(left), Scalar::Number(right)) => left
                .partial_cmp(right)
                .ok_or_else(|| PolicyError::Type("incomparable numbers".to_string())),
            (Scalar::String(left), Scalar::String(right)) => Ok(left.cmp(right)),
            (left, right) => Err(PolicyError::Type(format!(
                "cannot order {left} and {right}"
            ))),
        }
    };

    Ok(match operator {
        Comparison::Eq => left == right,
        Comparison::Ne => left != right,
        Comparison::Lt => ordering(&left, &right)?.is_lt(),
        Comparison::Le => ordering(&left, &right)?.is_le(),
        Comparison::Gt => ordering(&left, &right)?.is_gt(),
        Comparison::Ge => ordering(&left, &right)?.is_ge(),
        Comparison::Matches => match (left, right) {
            (Scalar::Null, _) => false,
            (Scalar::String(value), Scalar::String(pattern)) => Regex::new(&pattern)
                .map_err(|err| PolicyError::Type(err.to_string()))?
                .is_match(&value),
            (left, right) => {
                return Err(PolicyError::Type(format!("cannot match {left} against {right}")))
            }
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::json;

    fn context() -> JobContext {
        JobContext::flatten(&json!({
            "github": {"t": 2, "d": [
                {"k": "event_name", "v": "pull_request"},
                {"k": "ref", "v": "refs/heads/main"},
                {"k": "repository_owner", "v": "inloco"},
                {"k": "run_attempt", "v": {"t": 4, "n": 2}},
                {"k": "event", "v": {"t": 2, "d": [
                    {"k": "forced", "v": {"t": 3, "b": true}}
                ]}}
            ]}
        }))
    }

    fn evaluate(source: &str) -> Result<Scalar, PolicyError> {
        source.parse::<Expression>()?.evaluate(&context())
    }

    #[rstest]
    #[case::equal("github.event_name == 'pull_request'", true)]
    #[case::double_quotes("github.event_name == \"push\"", false)]
    #[case::not_equal("github.repository_owner != 'inloco'", false)]
    #[case::number("github.run_attempt >= 2", true)]
    #[case::string_order("'a' < 'b'", true)]
    #[case::bool_path("github.event.forced", true)]
    #[case::negation("!github.event.forced", false)]
    #[case::double_negation("!!github.event.forced", true)]
    #[case::and_or("github.event_name == 'push' || github.ref == 'refs/heads/main' && true", true)]
    #[case::precedence("(false || true) && false", false)]
    #[case::regex("github.ref =~ '^refs/heads/(main|release/.*)$'", true)]
    #[case::contains("contains(github.ref, 'heads')", true)]
    #[case::starts_with("startsWith(github.ref, 'refs/tags/')", false)]
    #[case::ends_with("endsWith(github.ref, '/main')", true)]
    #[case::contains_missing("contains(github.missing, 'x')", false)]
    #[case::exists("exists(github.event)", true)]
    #[case::not_exists("!exists(github.head_ref)", true)]
    #[case::missing_is_null("github.head_ref == null", true)]
    #[case::escaped_quote("'it''s' == \"it's\"", true)]
    #[case::negative_number("-1 < 0", true)]
    #[case::empty_strings("'' == \"\"", true)]
    fn test_evaluate(#[case] source: &str, #[case] expected: bool) {
        assert_eq!(evaluate(source).unwrap(), Scalar::Bool(expected));
    }

    #[test]
    fn test_non_boolean_result() {
        assert_eq!(
            evaluate("github.event_name").unwrap(),
            Scalar::String("pull_request".to_string())
        );
    }

    #[rstest]
    #[case::unbalanced("(github.ref == 'x'")]
    #[case::dangling_operator("github.ref ==")]
    #[case::unknown_function("matches(github.ref, 'x')")]
    #[case::exists_literal("exists('x')")]
    #[case::arity("contains(github.ref)")]
    #[case::bad_regex("github.ref =~ '('")]
    #[case::empty("")]
    fn test_parse_errors(#[case] source: &str) {
        assert_matches!(source.parse::<Expression>(), Err(PolicyError::Parse { .. }));
    }

    #[rstest]
    #[case::ordering_mixed("github.ref < 2")]
    #[case::not_of_string("!github.ref")]
    #[case::and_of_string("github.ref && true")]
    #[case::contains_number("contains(github.run_attempt, '2')")]
    fn test_type_errors(#[case] source: &str) {
        assert_matches!(evaluate(source), Err(PolicyError::Type(_)));
    }
}
