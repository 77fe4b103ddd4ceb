//! `$select` and `$expand` path lists, including nested expand options
//! such as `Orders($filter=Amount gt 10;$orderby=Date desc;$top=5)`.

use crate::error::{Error, SyntaxError};
use crate::lexer::{TokenKind, TokenStream};
use crate::options::QueryOption;

use super::parser::Parser;
use super::{OrderByItem, Span, SyntaxNode};

/// `/`-separated member path. Qualified segments are type casts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathExpr {
    pub segments: Vec<String>,
    /// Start offset of each segment.
    pub positions: Vec<usize>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectItem {
    /// `*`
    Wildcard(Span),
    Path(PathExpr),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpandTarget {
    /// `*`: every navigation property of the type.
    Wildcard,
    Path(PathExpr),
}

/// Unparsed scalar option value (`$top`, `$skip`, `$count`); validated by the
/// translator so paging errors are reported the same way at every level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawValue {
    pub text: String,
    pub span: Span,
}

/// Options nested in parentheses after an expanded navigation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpandOptions {
    pub filter: Option<SyntaxNode>,
    pub orderby: Option<Vec<OrderByItem>>,
    pub select: Option<Vec<SelectItem>>,
    pub expand: Option<Vec<ExpandItem>>,
    pub top: Option<RawValue>,
    pub skip: Option<RawValue>,
    pub count: Option<RawValue>,
}

impl ExpandOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == ExpandOptions::default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpandItem {
    pub target: ExpandTarget,
    pub options: ExpandOptions,
    pub span: Span,
}

/// Parsed `$select` and `$expand` of one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectExpandClauseTree {
    pub select: Vec<SelectItem>,
    pub expand: Vec<ExpandItem>,
}

/// Parses `$select` and `$expand` token streams into one clause tree.
///
/// # Errors
/// `Error::Syntax` tagged with the option the malformed input came from.
pub fn parse_select_expand(
    select: Option<&TokenStream<'_>>,
    expand: Option<&TokenStream<'_>>,
) -> Result<SelectExpandClauseTree, Error> {
    let mut tree = SelectExpandClauseTree::default();
    if let Some(tokens) = select {
        tree.select = parse_select(tokens).map_err(|e| Error::syntax(QueryOption::Select, e))?;
    }
    if let Some(tokens) = expand {
        tree.expand = parse_expand(tokens).map_err(|e| Error::syntax(QueryOption::Expand, e))?;
    }
    Ok(tree)
}

/// Parses a complete `$select` list.
///
/// # Errors
/// `SyntaxError` on a malformed item or trailing tokens.
pub fn parse_select(tokens: &TokenStream<'_>) -> Result<Vec<SelectItem>, SyntaxError> {
    let mut parser = Parser::new(tokens);
    let items = select_list(&mut parser)?;
    parser.finish(vec!["','", "end of input"])?;
    Ok(items)
}

/// Parses a complete `$expand` list.
///
/// # Errors
/// `SyntaxError` on a malformed item, unknown nested option or trailing tokens.
pub fn parse_expand(tokens: &TokenStream<'_>) -> Result<Vec<ExpandItem>, SyntaxError> {
    let mut parser = Parser::new(tokens);
    let items = expand_list(&mut parser, 0)?;
    parser.finish(vec!["','", "'('", "end of input"])?;
    Ok(items)
}

fn select_list(p: &mut Parser<'_, '_>) -> Result<Vec<SelectItem>, SyntaxError> {
    let mut items = vec![select_item(p)?];
    while p.eat(TokenKind::Comma).is_some() {
        items.push(select_item(p)?);
    }
    Ok(items)
}

fn select_item(p: &mut Parser<'_, '_>) -> Result<SelectItem, SyntaxError> {
    if let Some(star) = p.eat(TokenKind::Star) {
        return Ok(SelectItem::Wildcard(star.span));
    }
    path(p).map(SelectItem::Path)
}

fn path(p: &mut Parser<'_, '_>) -> Result<PathExpr, SyntaxError> {
    let mut segments = Vec::new();
    let mut positions = Vec::new();
    let mut span: Option<Span> = None;
    loop {
        let tok = match p.peek() {
            Some(tok)
                if matches!(tok.kind, TokenKind::Identifier | TokenKind::QualifiedName)
                    || tok.kind.is_keyword() =>
            {
                tok
            }
            _ => return Err(p.unexpected(vec!["identifier", "qualified name"])),
        };
        p.bump();
        segments.push(p.text(tok).to_owned());
        positions.push(tok.span.start);
        span = Some(span.map_or(tok.span, |s| s.to(tok.span)));
        if p.eat(TokenKind::Slash).is_none() {
            break;
        }
    }
    Ok(PathExpr {
        segments,
        positions,
        span: span.unwrap_or_default(),
    })
}

fn expand_list(p: &mut Parser<'_, '_>, depth: usize) -> Result<Vec<ExpandItem>, SyntaxError> {
    let mut items = vec![expand_item(p, depth)?];
    while p.eat(TokenKind::Comma).is_some() {
        items.push(expand_item(p, depth)?);
    }
    Ok(items)
}

fn expand_item(p: &mut Parser<'_, '_>, depth: usize) -> Result<ExpandItem, SyntaxError> {
    let start = p.position();
    let (target, mut span) = match p.eat(TokenKind::Star) {
        Some(star) => (ExpandTarget::Wildcard, star.span),
        None => {
            let path = path(p)?;
            let span = path.span;
            (ExpandTarget::Path(path), span)
        }
    };

    let mut options = ExpandOptions::default();
    if p.eat(TokenKind::OpenParen).is_some() {
        if depth >= super::parser::MAX_NESTING {
            return Err(SyntaxError::new(
                start,
                vec!["shallower nesting"],
                "$expand nested too deeply",
            ));
        }
        options = expand_options(p, depth + 1)?;
        let close = p
            .eat(TokenKind::CloseParen)
            .ok_or_else(|| p.unexpected(vec!["';'", "')'"]))?;
        span = span.to(close.span);
    }

    Ok(ExpandItem {
        target,
        options,
        span,
    })
}

const NESTED_OPTIONS: &[&str] = &[
    "'$filter'",
    "'$orderby'",
    "'$select'",
    "'$expand'",
    "'$top'",
    "'$skip'",
    "'$count'",
];

fn expand_options(p: &mut Parser<'_, '_>, depth: usize) -> Result<ExpandOptions, SyntaxError> {
    let mut options = ExpandOptions::default();
    loop {
        let Some(name_tok) = p.eat(TokenKind::DollarName) else {
            return Err(p.unexpected(NESTED_OPTIONS.to_vec()));
        };
        let name = p.text(name_tok);
        let option: QueryOption = name.parse().map_err(|_| {
            SyntaxError::new(
                name_tok.span.start,
                NESTED_OPTIONS.to_vec(),
                format!("'{name}'"),
            )
        })?;
        p.expect(TokenKind::Equals)?;

        let duplicate = match option {
            QueryOption::Filter => options.filter.replace(p.parse_expression()?).is_some(),
            QueryOption::OrderBy => options.orderby.replace(p.parse_orderby_list()?).is_some(),
            QueryOption::Select => options.select.replace(select_list(p)?).is_some(),
            QueryOption::Expand => options.expand.replace(expand_list(p, depth)?).is_some(),
            QueryOption::Top => options.top.replace(raw_value(p)?).is_some(),
            QueryOption::Skip => options.skip.replace(raw_value(p)?).is_some(),
            QueryOption::Count => options.count.replace(raw_value(p)?).is_some(),
        };
        if duplicate {
            return Err(SyntaxError::new(
                name_tok.span.start,
                vec!["each nested option at most once"],
                format!("duplicate '{}'", option.name()),
            ));
        }

        if p.eat(TokenKind::Semicolon).is_none() {
            return Ok(options);
        }
    }
}

/// Consumes tokens up to the next `;` or `)`.
fn raw_value(p: &mut Parser<'_, '_>) -> Result<RawValue, SyntaxError> {
    let Some(first) = p.peek().filter(|t| !is_option_end(t.kind)) else {
        return Err(p.unexpected(vec!["value"]));
    };
    let mut last = first;
    while let Some(tok) = p.peek() {
        if is_option_end(tok.kind) {
            break;
        }
        last = tok;
        p.bump();
    }
    Ok(RawValue {
        text: p.slice(first, last).to_owned(),
        span: first.span.to(last.span),
    })
}

fn is_option_end(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Semicolon | TokenKind::CloseParen)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::syntax::SortDir;

    fn segments(item: &SelectItem) -> Vec<&str> {
        match item {
            SelectItem::Wildcard(_) => vec!["*"],
            SelectItem::Path(p) => p.segments.iter().map(String::as_str).collect(),
        }
    }

    fn expand(src: &str) -> Vec<ExpandItem> {
        parse_expand(&tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn select_paths_and_wildcard() {
        let items = parse_select(&tokenize("Name, Address/City, *").unwrap()).unwrap();
        let rendered: Vec<_> = items.iter().map(segments).collect();
        assert_eq!(
            rendered,
            vec![vec!["Name"], vec!["Address", "City"], vec!["*"]]
        );
    }

    #[test]
    fn select_with_type_cast_segment() {
        let items = parse_select(&tokenize("Sales.VipCustomer/Level").unwrap()).unwrap();
        assert_eq!(segments(&items[0]), vec!["Sales.VipCustomer", "Level"]);
    }

    #[test]
    fn segment_positions_follow_the_source() {
        let items = parse_select(&tokenize("Address /  City").unwrap()).unwrap();
        let SelectItem::Path(path) = &items[0] else {
            panic!("expected a path");
        };
        assert_eq!(path.positions, vec![0, 11]);
        assert_eq!(path.span, Span::new(0, 15));
    }

    #[test]
    fn select_rejects_expressions() {
        let err = parse_select(&tokenize("Name eq 1").unwrap()).unwrap_err();
        assert_eq!(err.position, 5);
    }

    #[test]
    fn expand_with_nested_options() {
        let items = expand("Orders($filter=Amount gt 10;$orderby=Date desc;$top=5;$count=true)");
        assert_eq!(items.len(), 1);
        let opts = &items[0].options;
        assert!(opts.filter.is_some());
        assert_eq!(opts.orderby.as_ref().unwrap()[0].dir, SortDir::Desc);
        assert_eq!(opts.top.as_ref().unwrap().text, "5");
        assert_eq!(opts.count.as_ref().unwrap().text, "true");
        assert_eq!(items[0].span, Span::new(0, 66));
    }

    #[test]
    fn nested_expand_inside_expand() {
        let items = expand("Orders($expand=Lines($select=Sku)),Customer");
        assert_eq!(items.len(), 2);
        let nested = items[0].options.expand.as_ref().unwrap();
        let select = nested[0].options.select.as_ref().unwrap();
        assert_eq!(segments(&select[0]), vec!["Sku"]);
        assert!(items[1].options.is_empty());
    }

    #[test]
    fn raw_paging_values_are_kept_verbatim() {
        let items = expand("Orders($skip=-1)");
        assert_eq!(items[0].options.skip.as_ref().unwrap().text, "-1");
    }

    #[test]
    fn unknown_nested_option_is_rejected() {
        let err = parse_expand(&tokenize("Orders($levels=2)").unwrap()).unwrap_err();
        assert_eq!(err.position, 7);
        assert_eq!(err.found, "'$levels'");
    }

    #[test]
    fn duplicate_nested_option_is_rejected() {
        let err = parse_expand(&tokenize("Orders($top=1;$top=2)").unwrap()).unwrap_err();
        assert_eq!(err.position, 14);
    }

    #[test]
    fn missing_close_paren() {
        let err = parse_expand(&tokenize("Orders($top=1").unwrap()).unwrap_err();
        assert_eq!(err.found, "end of input");
    }

    #[test]
    fn combined_entrypoint_tags_option() {
        let sel = tokenize("Name,").unwrap();
        let err = parse_select_expand(Some(&sel), None).unwrap_err();
        assert_eq!(err.option(), Some(QueryOption::Select));
        assert_eq!(err.offset(), Some(5));
    }
}
