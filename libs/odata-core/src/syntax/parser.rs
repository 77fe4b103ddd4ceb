use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind, TokenStream};

use super::{
    BinaryOperator, LambdaKind, OrderByItem, Segment, SortDir, Span, SyntaxNode, UnaryOperator,
};

/// Nesting limit for parenthesized expressions, `not` chains and lambdas.
pub const MAX_NESTING: usize = 128;

const EXPRESSION_START: &[&str] = &["literal", "identifier", "'('", "'-'", "'not'"];

/// Recursive-descent parser over a token stream.
///
/// Precedence, lowest first: `or`, `and`, `not`, relational (`eq ne gt ge lt
/// le has in`), additive, multiplicative, unary minus, primary.
pub struct Parser<'a, 'src> {
    stream: &'a TokenStream<'src>,
    pos: usize,
    depth: usize,
    variables: Vec<String>,
}

impl<'a, 'src> Parser<'a, 'src> {
    #[must_use]
    pub fn new(stream: &'a TokenStream<'src>) -> Self {
        Self {
            stream,
            pos: 0,
            depth: 0,
            variables: Vec::new(),
        }
    }

    // ---- token cursor ----

    pub(crate) fn peek(&self) -> Option<&'a Token> {
        self.stream.tokens().get(self.pos)
    }

    pub(crate) fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.stream.tokens().get(self.pos + n).map(|t| t.kind)
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.stream.len()
    }

    pub(crate) fn bump(&mut self) -> Option<&'a Token> {
        let tok = self.peek()?;
        self.pos += 1;
        Some(tok)
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> Option<&'a Token> {
        if self.at(kind) { self.bump() } else { None }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Result<&'a Token, SyntaxError> {
        self.eat(kind)
            .ok_or_else(|| self.unexpected(vec![kind.describe()]))
    }

    pub(crate) fn text(&self, token: &Token) -> &'src str {
        self.stream.text(token)
    }

    pub(crate) fn slice(&self, first: &Token, last: &Token) -> &'src str {
        self.stream.slice(first, last)
    }

    /// Character offset of the current token, or end of input.
    pub(crate) fn position(&self) -> usize {
        self.peek().map_or(self.stream.end(), |t| t.span.start)
    }

    pub(crate) fn unexpected(&self, expected: Vec<&'static str>) -> SyntaxError {
        let found = match self.peek() {
            Some(tok) => format!("'{}'", self.text(tok)),
            None => "end of input".to_owned(),
        };
        SyntaxError::new(self.position(), expected, found)
    }

    /// Fails unless every token has been consumed.
    ///
    /// # Errors
    /// `SyntaxError` naming the trailing token.
    pub fn finish(&self, expected: Vec<&'static str>) -> Result<(), SyntaxError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new(
                self.position(),
                vec!["shallower nesting"],
                format!("expression nested more than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ---- expressions ----

    /// Parses one boolean or value expression.
    ///
    /// # Errors
    /// `SyntaxError` on a malformed token sequence.
    pub fn parse_expression(&mut self) -> Result<SyntaxNode, SyntaxError> {
        self.enter()?;
        let node = self.parse_or();
        self.leave();
        node
    }

    fn parse_or(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut left = self.parse_and()?;
        while self.eat(TokenKind::Or).is_some() {
            let right = self.parse_and()?;
            left = binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut left = self.parse_not()?;
        while self.eat(TokenKind::And).is_some() {
            let right = self.parse_not()?;
            left = binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let Some(not) = self.eat(TokenKind::Not) else {
            return self.parse_relational();
        };
        self.enter()?;
        let operand = self.parse_not();
        self.leave();
        let operand = operand?;
        Ok(SyntaxNode::UnaryOp {
            op: UnaryOperator::Not,
            span: not.span.to(operand.span()),
            operand: Box::new(operand),
        })
    }

    fn parse_relational(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut left = self.parse_additive()?;
        loop {
            if self.at(TokenKind::In) {
                self.bump();
                left = self.parse_in_list(left)?;
                continue;
            }
            let Some(op) = self.peek_kind().and_then(relational_operator) else {
                return Ok(left);
            };
            self.bump();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_in_list(&mut self, operand: SyntaxNode) -> Result<SyntaxNode, SyntaxError> {
        self.expect(TokenKind::OpenParen)?;
        let mut list = vec![self.parse_expression()?];
        while self.eat(TokenKind::Comma).is_some() {
            list.push(self.parse_expression()?);
        }
        let close = self
            .eat(TokenKind::CloseParen)
            .ok_or_else(|| self.unexpected(vec!["','", "')'"]))?;
        Ok(SyntaxNode::In {
            span: operand.span().to(close.span),
            operand: Box::new(operand),
            list,
        })
    }

    fn parse_additive(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Add) => BinaryOperator::Add,
                Some(TokenKind::Sub) => BinaryOperator::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Mul) => BinaryOperator::Mul,
                Some(TokenKind::Div) => BinaryOperator::Div,
                Some(TokenKind::DivBy) => BinaryOperator::DivBy,
                Some(TokenKind::Mod) => BinaryOperator::Mod,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let Some(minus) = self.eat(TokenKind::Minus) else {
            return self.parse_postfix();
        };

        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let operand = operand?;
        Ok(SyntaxNode::UnaryOp {
            op: UnaryOperator::Negate,
            span: minus.span.to(operand.span()),
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let mut node = self.parse_primary()?;
        while self.eat(TokenKind::Slash).is_some() {
            node = self.parse_segment(node)?;
        }
        Ok(node)
    }

    fn parse_segment(&mut self, source: SyntaxNode) -> Result<SyntaxNode, SyntaxError> {
        const EXPECTED: &[&str] = &["identifier", "qualified name", "'$count'"];

        let Some(tok) = self.peek() else {
            return Err(self.unexpected(EXPECTED.to_vec()));
        };
        let text = self.text(tok);
        let segment = match tok.kind {
            TokenKind::Identifier
                if (text.eq_ignore_ascii_case("any") || text.eq_ignore_ascii_case("all"))
                    && self.peek_nth_kind(1) == Some(TokenKind::OpenParen) =>
            {
                self.bump();
                let kind = if text.eq_ignore_ascii_case("any") {
                    LambdaKind::Any
                } else {
                    LambdaKind::All
                };
                return self.parse_lambda(source, kind, tok.span);
            }
            TokenKind::Identifier => Segment::Member(text.to_owned()),
            kind if kind.is_keyword() => Segment::Member(text.to_owned()),
            TokenKind::QualifiedName => Segment::TypeCast(text.to_owned()),
            TokenKind::DollarName if text == "$count" => Segment::Count,
            _ => return Err(self.unexpected(EXPECTED.to_vec())),
        };
        self.bump();
        Ok(SyntaxNode::PathSegment {
            span: source.span().to(tok.span),
            source: Box::new(source),
            segment,
        })
    }

    fn parse_lambda(
        &mut self,
        source: SyntaxNode,
        kind: LambdaKind,
        start: Span,
    ) -> Result<SyntaxNode, SyntaxError> {
        self.expect(TokenKind::OpenParen)?;

        if let Some(close) = self.eat(TokenKind::CloseParen) {
            return Ok(SyntaxNode::PathSegment {
                span: source.span().to(start).to(close.span),
                source: Box::new(source),
                segment: Segment::Lambda {
                    kind,
                    variable: None,
                    predicate: None,
                },
            });
        }

        let var = self
            .eat(TokenKind::Identifier)
            .ok_or_else(|| self.unexpected(vec!["range variable", "')'"]))?;
        let variable = self.text(var).to_owned();
        self.expect(TokenKind::Colon)?;

        self.variables.push(variable.clone());
        let predicate = self.parse_expression();
        self.variables.pop();
        let predicate = predicate?;

        let close = self
            .eat(TokenKind::CloseParen)
            .ok_or_else(|| self.unexpected(vec!["')'"]))?;
        Ok(SyntaxNode::PathSegment {
            span: source.span().to(close.span),
            source: Box::new(source),
            segment: Segment::Lambda {
                kind,
                variable: Some(variable),
                predicate: Some(Box::new(predicate)),
            },
        })
    }

    fn parse_primary(&mut self) -> Result<SyntaxNode, SyntaxError> {
        let Some(tok) = self.peek() else {
            return Err(self.unexpected(EXPRESSION_START.to_vec()));
        };

        if let Some(value) = tok.literal.clone() {
            self.bump();
            return Ok(SyntaxNode::Literal {
                value,
                span: tok.span,
            });
        }

        match tok.kind {
            TokenKind::OpenParen => {
                self.bump();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Identifier | TokenKind::QualifiedName
                if self.peek_nth_kind(1) == Some(TokenKind::OpenParen) =>
            {
                self.bump();
                self.parse_call(tok)
            }
            TokenKind::Identifier => {
                self.bump();
                let name = self.text(tok).to_owned();
                if self.variables.iter().any(|v| *v == name) {
                    Ok(SyntaxNode::RangeVariable {
                        name,
                        span: tok.span,
                    })
                } else {
                    Ok(SyntaxNode::Identifier {
                        name,
                        span: tok.span,
                    })
                }
            }
            TokenKind::QualifiedName => {
                self.bump();
                Ok(SyntaxNode::QualifiedName {
                    name: self.text(tok).to_owned(),
                    span: tok.span,
                })
            }
            TokenKind::DollarName if matches!(self.text(tok), "$it" | "$this") => {
                self.bump();
                Ok(SyntaxNode::RangeVariable {
                    name: "$it".to_owned(),
                    span: tok.span,
                })
            }
            _ => Err(self.unexpected(EXPRESSION_START.to_vec())),
        }
    }

    fn parse_call(&mut self, name: &Token) -> Result<SyntaxNode, SyntaxError> {
        self.expect(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        if !self.at(TokenKind::CloseParen) {
            args.push(self.parse_expression()?);
            while self.eat(TokenKind::Comma).is_some() {
                args.push(self.parse_expression()?);
            }
        }
        let close = self
            .eat(TokenKind::CloseParen)
            .ok_or_else(|| self.unexpected(vec!["','", "')'"]))?;
        Ok(SyntaxNode::FunctionCall {
            name: self.text(name).to_owned(),
            args,
            span: name.span.to(close.span),
        })
    }

    // ---- $orderby ----

    /// Parses `expr [asc|desc] (',' expr [asc|desc])*`, stopping at the first
    /// token that cannot continue the list.
    ///
    /// # Errors
    /// `SyntaxError` on a malformed item.
    pub fn parse_orderby_list(&mut self) -> Result<Vec<OrderByItem>, SyntaxError> {
        let mut items = vec![self.parse_orderby_item()?];
        while self.eat(TokenKind::Comma).is_some() {
            items.push(self.parse_orderby_item()?);
        }
        Ok(items)
    }

    fn parse_orderby_item(&mut self) -> Result<OrderByItem, SyntaxError> {
        let expr = self.parse_expression()?;
        let mut span = expr.span();
        let mut dir = SortDir::Asc;

        if let Some(tok) = self.peek()
            && tok.kind == TokenKind::Identifier
        {
            let word = self.text(tok);
            dir = if word.eq_ignore_ascii_case("asc") {
                SortDir::Asc
            } else if word.eq_ignore_ascii_case("desc") {
                SortDir::Desc
            } else {
                return Err(self.unexpected(vec!["'asc'", "'desc'", "','"]));
            };
            self.bump();
            span = span.to(tok.span);
        }

        Ok(OrderByItem { expr, dir, span })
    }
}

/// Parses a complete `$filter` expression.
///
/// # Errors
/// `SyntaxError` on a malformed or incomplete expression, or trailing tokens.
pub fn parse_filter(tokens: &TokenStream<'_>) -> Result<SyntaxNode, SyntaxError> {
    let mut parser = Parser::new(tokens);
    let node = parser.parse_expression()?;
    parser.finish(vec!["operator", "end of input"])?;
    Ok(node)
}

/// Parses a complete `$orderby` list.
///
/// # Errors
/// `SyntaxError` on a malformed item or trailing tokens.
pub fn parse_orderby(tokens: &TokenStream<'_>) -> Result<Vec<OrderByItem>, SyntaxError> {
    let mut parser = Parser::new(tokens);
    let items = parser.parse_orderby_list()?;
    parser.finish(vec!["','", "end of input"])?;
    Ok(items)
}

fn binary(op: BinaryOperator, left: SyntaxNode, right: SyntaxNode) -> SyntaxNode {
    SyntaxNode::BinaryOp {
        op,
        span: left.span().to(right.span()),
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn relational_operator(kind: TokenKind) -> Option<BinaryOperator> {
    Some(match kind {
        TokenKind::Eq => BinaryOperator::Eq,
        TokenKind::Ne => BinaryOperator::Ne,
        TokenKind::Gt => BinaryOperator::Gt,
        TokenKind::Ge => BinaryOperator::Ge,
        TokenKind::Lt => BinaryOperator::Lt,
        TokenKind::Le => BinaryOperator::Le,
        TokenKind::Has => BinaryOperator::Has,
        _ => return None,
    })
}
