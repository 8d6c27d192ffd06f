//! Core chess primitives shared by the rules engine, the game engine, and
//! the wire layer.
//!
//! Board/piece/square representation follows the FIDE 2023 Laws of Chess.
//! Everything in this module is a pure value type — no I/O, no game-state
//! bookkeeping (that lives in `engine`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Piece & Color
// ---------------------------------------------------------------------------

/// The color (side) of a chess piece, equivalently which half of the board
/// it started on. Distinct from `Side`, which is the account-level
/// Host/Away role — see `Side::color`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Home rank index (0-based) for pawns of this color.
    pub fn pawn_start_rank(self) -> u8 {
        match self {
            Color::White => 1,
            Color::Black => 6,
        }
    }

    /// Promotion rank index (0-based).
    pub fn promotion_rank(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// Direction pawns move: +1 for White, -1 for Black.
    pub fn pawn_direction(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// A chess piece type, without color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl PieceKind {
    /// The wire integer code used by the sparse board map (§6 "enums as
    /// integers"). Arbitrary but stable ordering; King is the piece most
    /// often looked up so it is given 0.
    pub fn wire_code(self) -> u8 {
        match self {
            PieceKind::King => 0,
            PieceKind::Queen => 1,
            PieceKind::Rook => 2,
            PieceKind::Bishop => 3,
            PieceKind::Knight => 4,
            PieceKind::Pawn => 5,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PieceKind::King),
            1 => Some(PieceKind::Queen),
            2 => Some(PieceKind::Rook),
            3 => Some(PieceKind::Bishop),
            4 => Some(PieceKind::Knight),
            5 => Some(PieceKind::Pawn),
            _ => None,
        }
    }
}

/// A chess piece with both kind and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    /// FEN character: uppercase for White, lowercase for Black. Used only
    /// internally (repetition fingerprinting, debug logging) — the wire
    /// board format is the sparse `[piece_code, side_code]` map, not FEN.
    pub fn to_fen_char(self) -> char {
        let c = match self.kind {
            PieceKind::King => 'K',
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            PieceKind::Pawn => 'P',
        };
        match self.color {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A square on the board using 0-based file and rank indices.
///
/// - `file`: 0 (a) to 7 (h)
/// - `rank`: 0 (rank 1) to 7 (rank 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    /// Panics if file or rank >= 8.
    pub fn new(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8 && rank < 8, "Square out of bounds");
        Self { file, rank }
    }

    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        if file < 8 && rank < 8 {
            Some(Square { file, rank })
        } else {
            None
        }
    }

    pub fn to_algebraic(self) -> String {
        format!("{}{}", (b'a' + self.file) as char, self.rank + 1)
    }

    pub fn offset(self, df: i8, dr: i8) -> Option<Square> {
        let f = self.file as i8 + df;
        let r = self.rank as i8 + dr;
        if (0..8).contains(&f) && (0..8).contains(&r) {
            Some(Square::new(f as u8, r as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        (self.rank as usize) * 8 + self.file as usize
    }

    /// The `"<rank>,<file>"` wire key spec.md's board map uses.
    pub fn wire_key(self) -> String {
        format!("{},{}", self.rank, self.file)
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(2, ',');
        let rank: u8 = parts.next()?.parse().ok()?;
        let file: u8 = parts.next()?.parse().ok()?;
        if rank < 8 && file < 8 {
            Some(Square { file, rank })
        } else {
            None
        }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Castling Rights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct SideCastlingRights {
    pub kingside: bool,
    pub queenside: bool,
}

impl Default for SideCastlingRights {
    fn default() -> Self {
        Self {
            kingside: true,
            queenside: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct CastlingRights {
    pub white: SideCastlingRights,
    pub black: SideCastlingRights,
}

impl CastlingRights {
    pub fn for_color(&self, color: Color) -> &SideCastlingRights {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn for_color_mut(&mut self, color: Color) -> &mut SideCastlingRights {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The board as a flat 64-element array. `None` means the square is empty.
/// Index mapping: `rank * 8 + file` (both 0-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub squares: [Option<Piece>; 64],
}

impl Default for Board {
    fn default() -> Self {
        Self { squares: [None; 64] }
    }
}

impl Board {
    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    pub fn set(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.index()] = piece;
    }

    pub fn starting_position() -> Self {
        let mut board = Board::default();

        let mut place = |file: u8, rank: u8, kind: PieceKind, color: Color| {
            board.set(Square::new(file, rank), Some(Piece::new(kind, color)));
        };

        place(0, 0, PieceKind::Rook, Color::White);
        place(1, 0, PieceKind::Knight, Color::White);
        place(2, 0, PieceKind::Bishop, Color::White);
        place(3, 0, PieceKind::Queen, Color::White);
        place(4, 0, PieceKind::King, Color::White);
        place(5, 0, PieceKind::Bishop, Color::White);
        place(6, 0, PieceKind::Knight, Color::White);
        place(7, 0, PieceKind::Rook, Color::White);

        for f in 0..8 {
            place(f, 1, PieceKind::Pawn, Color::White);
        }
        for f in 0..8 {
            place(f, 6, PieceKind::Pawn, Color::Black);
        }

        place(0, 7, PieceKind::Rook, Color::Black);
        place(1, 7, PieceKind::Knight, Color::Black);
        place(2, 7, PieceKind::Bishop, Color::Black);
        place(3, 7, PieceKind::Queen, Color::Black);
        place(4, 7, PieceKind::King, Color::Black);
        place(5, 7, PieceKind::Bishop, Color::Black);
        place(6, 7, PieceKind::Knight, Color::Black);
        place(7, 7, PieceKind::Rook, Color::Black);

        board
    }

    /// Sparse wire map per §6: `{"<rank>,<file>": [piece_code, side_code]}`,
    /// omitting empty squares.
    pub fn to_wire_map(&self) -> HashMap<String, (u8, u8)> {
        let mut map = HashMap::new();
        for rank in 0..8u8 {
            for file in 0..8u8 {
                let sq = Square::new(file, rank);
                if let Some(piece) = self.get(sq) {
                    let side_code = match piece.color {
                        Color::White => 0,
                        Color::Black => 1,
                    };
                    map.insert(sq.wire_key(), (piece.kind.wire_code(), side_code));
                }
            }
        }
        map
    }

    pub fn from_wire_map(map: &HashMap<String, (u8, u8)>) -> Result<Self, String> {
        let mut board = Board::default();
        for (key, (piece_code, side_code)) in map {
            let sq = Square::from_wire_key(key).ok_or_else(|| format!("invalid square key: {key}"))?;
            let kind = PieceKind::from_wire_code(*piece_code)
                .ok_or_else(|| format!("invalid piece code: {piece_code}"))?;
            let color = match side_code {
                0 => Color::White,
                1 => Color::Black,
                other => return Err(format!("invalid side code: {other}")),
            };
            board.set(sq, Some(Piece::new(kind, color)));
        }
        Ok(board)
    }

    pub fn find_king(&self, color: Color) -> Option<Square> {
        for rank in 0..8u8 {
            for file in 0..8u8 {
                let sq = Square::new(file, rank);
                if let Some(piece) = self.get(sq)
                    && piece.kind == PieceKind::King
                    && piece.color == color
                {
                    return Some(sq);
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Position — a board plus the state needed to judge legality and repetition
// ---------------------------------------------------------------------------

/// Everything `movegen`'s pure functions need besides the raw piece
/// placement: whose move it is, castling rights, and the en passant target.
/// This is "a position" in spec.md §4.1's sense — the unit `fingerprint`,
/// `terminal`, and `legal_moves` all operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub board: Board,
    pub turn: Color,
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
}

impl Position {
    pub fn starting(host_color: Color) -> Self {
        let _ = host_color; // the board itself is colorless w.r.t. host/away
        Self {
            board: Board::starting_position(),
            turn: Color::White,
            castling: CastlingRights::default(),
            en_passant: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Account-level side (Host / Away) — distinct from board Color
// ---------------------------------------------------------------------------

/// Which of the two accounts in a Game: the one who opened it (`Host`) or
/// the one who joined it (`Away`). Host always plays White and moves first
/// (turn_number 0); this mapping is fixed for the lifetime of a Game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Host,
    Away,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Host => Side::Away,
            Side::Away => Side::Host,
        }
    }

    pub fn color(self) -> Color {
        match self {
            Side::Host => Color::White,
            Side::Away => Color::Black,
        }
    }

    pub fn from_color(color: Color) -> Self {
        match color {
            Color::White => Side::Host,
            Color::Black => Side::Away,
        }
    }

    /// Host moves on even turns, Away on odd — §3 Data model.
    pub fn to_move_on(turn_number: u32) -> Self {
        if turn_number % 2 == 0 {
            Side::Host
        } else {
            Side::Away
        }
    }
}

// ---------------------------------------------------------------------------
// Wire-facing closed enums (§3 Game fields)
// ---------------------------------------------------------------------------

/// Game mode. Only Chess is defined (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[repr(u8)]
pub enum GameMode {
    Chess = 1,
}

/// The outcome of a Finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Winner {
    None,
    Host,
    Away,
    Draw,
}

/// Why a Finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Conclusion {
    None,
    Checkmate,
    Resignation,
    OutOfTime,
    Stalemate,
    ThreefoldRepetition,
    FiftyMoveRule,
    AgreedDraw,
}

/// A 128-bit opaque position fingerprint (GLOSSARY: "equal for equivalent
/// positions"). Produced by `movegen::fingerprint`.
pub type Fingerprint = u128;

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// A chess move: `(start_rank, start_file, end_rank, end_file, promotion?)`
/// per spec.md §4.1. Castling and en passant are ordinary king/pawn moves
/// whose extra semantics are resolved against a `Position` by `movegen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChessMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
    pub is_castling: bool,
    pub is_en_passant: bool,
}

impl ChessMove {
    pub fn simple(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
            is_castling: false,
            is_en_passant: false,
        }
    }
}

impl fmt::Display for ChessMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from.to_algebraic(), self.to.to_algebraic())?;
        if let Some(promo) = self.promotion {
            let c = match promo {
                PieceKind::Queen => 'Q',
                PieceKind::Rook => 'R',
                PieceKind::Bishop => 'B',
                PieceKind::Knight => 'N',
                _ => '?',
            };
            write!(f, "={}", c)?;
        }
        Ok(())
    }
}

/// The wire shape of a move in the `move` client event: 0-based
/// rank/file pairs plus an optional promotion piece code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct MoveWire {
    pub start_rank: u8,
    pub start_file: u8,
    pub end_rank: u8,
    pub end_file: u8,
    pub promotion: Option<u8>,
}

impl MoveWire {
    pub fn to_chess_move(self) -> Result<ChessMove, String> {
        if self.start_rank >= 8 || self.start_file >= 8 || self.end_rank >= 8 || self.end_file >= 8 {
            return Err("square out of range".to_string());
        }
        let promotion = match self.promotion {
            Some(code) => Some(
                PieceKind::from_wire_code(code).ok_or_else(|| format!("invalid promotion code: {code}"))?,
            ),
            None => None,
        };
        Ok(ChessMove {
            from: Square::new(self.start_file, self.start_rank),
            to: Square::new(self.end_file, self.end_rank),
            promotion,
            is_castling: false,
            is_en_passant: false,
        })
    }

    pub fn from_chess_move(m: ChessMove) -> Self {
        Self {
            start_rank: m.from.rank,
            start_file: m.from.file,
            end_rank: m.to.rank,
            end_file: m.to.file,
            promotion: m.promotion.map(PieceKind::wire_code),
        }
    }
}
