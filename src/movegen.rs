//! Chess rules — pure functions over an immutable `Position` (spec §4.1).
//!
//! Implements complete legal move generation following FIDE 2023 Laws of
//! Chess (Articles 3, 5, 9): piece movement patterns, castling, en passant,
//! promotion, and check/checkmate/stalemate detection. Nothing here touches
//! clocks, turn history, or anything else that lives in `engine::Game` —
//! nothing here is specific to a network protocol either.

use crate::types::*;

// ---------------------------------------------------------------------------
// Attack detection
// ---------------------------------------------------------------------------

/// Returns `true` if `sq` is attacked by any piece of `attacker_color`.
pub fn is_square_attacked(board: &Board, sq: Square, attacker_color: Color) -> bool {
    let knight_offsets: [(i8, i8); 8] = [
        (-2, -1), (-2, 1), (-1, -2), (-1, 2),
        (1, -2), (1, 2), (2, -1), (2, 1),
    ];
    for &(df, dr) in &knight_offsets {
        if let Some(from) = sq.offset(df, dr)
            && let Some(piece) = board.get(from)
            && piece.color == attacker_color && piece.kind == PieceKind::Knight
        {
            return true;
        }
    }

    for df in -1..=1i8 {
        for dr in -1..=1i8 {
            if df == 0 && dr == 0 {
                continue;
            }
            if let Some(from) = sq.offset(df, dr)
                && let Some(piece) = board.get(from)
                && piece.color == attacker_color && piece.kind == PieceKind::King
            {
                return true;
            }
        }
    }

    let pawn_dir: i8 = match attacker_color {
        Color::White => 1,
        Color::Black => -1,
    };
    for df in [-1i8, 1] {
        if let Some(from) = sq.offset(df, -pawn_dir)
            && let Some(piece) = board.get(from)
            && piece.color == attacker_color && piece.kind == PieceKind::Pawn
        {
            return true;
        }
    }

    let bishop_dirs: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
    let rook_dirs: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

    for &(df, dr) in &bishop_dirs {
        let mut cur = sq;
        loop {
            match cur.offset(df, dr) {
                None => break,
                Some(next) => {
                    if let Some(piece) = board.get(next) {
                        if piece.color == attacker_color
                            && (piece.kind == PieceKind::Bishop || piece.kind == PieceKind::Queen)
                        {
                            return true;
                        }
                        break;
                    }
                    cur = next;
                }
            }
        }
    }

    for &(df, dr) in &rook_dirs {
        let mut cur = sq;
        loop {
            match cur.offset(df, dr) {
                None => break,
                Some(next) => {
                    if let Some(piece) = board.get(next) {
                        if piece.color == attacker_color
                            && (piece.kind == PieceKind::Rook || piece.kind == PieceKind::Queen)
                        {
                            return true;
                        }
                        break;
                    }
                    cur = next;
                }
            }
        }
    }

    false
}

/// Returns `true` if `color`'s king is currently in check — `is_check` per
/// spec §4.1.
pub fn is_check(position: &Position, color: Color) -> bool {
    match position.board.find_king(color) {
        Some(king_sq) => is_square_attacked(&position.board, king_sq, color.opponent()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Pseudo-legal move generation (before check filtering)
// ---------------------------------------------------------------------------

fn generate_pseudo_legal_moves(position: &Position) -> Vec<ChessMove> {
    let board = &position.board;
    let turn = position.turn;
    let mut moves = Vec::with_capacity(64);

    for rank in 0..8u8 {
        for file in 0..8u8 {
            let from = Square::new(file, rank);
            let piece = match board.get(from) {
                Some(p) if p.color == turn => p,
                _ => continue,
            };

            match piece.kind {
                PieceKind::King => {
                    generate_king_moves(board, from, turn, &position.castling, &mut moves)
                }
                PieceKind::Queen => generate_sliding_moves(board, from, turn, &QUEEN_DIRS, &mut moves),
                PieceKind::Rook => generate_sliding_moves(board, from, turn, &ROOK_DIRS, &mut moves),
                PieceKind::Bishop => generate_sliding_moves(board, from, turn, &BISHOP_DIRS, &mut moves),
                PieceKind::Knight => generate_knight_moves(board, from, turn, &mut moves),
                PieceKind::Pawn => {
                    generate_pawn_moves(board, from, turn, position.en_passant, &mut moves)
                }
            }
        }
    }

    moves
}

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const QUEEN_DIRS: [(i8, i8); 8] = [
    (-1, 0), (1, 0), (0, -1), (0, 1),
    (-1, -1), (-1, 1), (1, -1), (1, 1),
];

fn generate_sliding_moves(
    board: &Board,
    from: Square,
    color: Color,
    directions: &[(i8, i8)],
    moves: &mut Vec<ChessMove>,
) {
    for &(df, dr) in directions {
        let mut cur = from;
        loop {
            match cur.offset(df, dr) {
                None => break,
                Some(to) => match board.get(to) {
                    None => {
                        moves.push(ChessMove::simple(from, to));
                        cur = to;
                    }
                    Some(target) => {
                        if target.color != color {
                            moves.push(ChessMove::simple(from, to));
                        }
                        break;
                    }
                },
            }
        }
    }
}

fn generate_knight_moves(board: &Board, from: Square, color: Color, moves: &mut Vec<ChessMove>) {
    let offsets: [(i8, i8); 8] = [
        (-2, -1), (-2, 1), (-1, -2), (-1, 2),
        (1, -2), (1, 2), (2, -1), (2, 1),
    ];
    for &(df, dr) in &offsets {
        if let Some(to) = from.offset(df, dr) {
            match board.get(to) {
                None => moves.push(ChessMove::simple(from, to)),
                Some(target) => {
                    if target.color != color {
                        moves.push(ChessMove::simple(from, to));
                    }
                }
            }
        }
    }
}

fn generate_king_moves(
    board: &Board,
    from: Square,
    color: Color,
    castling: &CastlingRights,
    moves: &mut Vec<ChessMove>,
) {
    for df in -1..=1i8 {
        for dr in -1..=1i8 {
            if df == 0 && dr == 0 {
                continue;
            }
            if let Some(to) = from.offset(df, dr) {
                match board.get(to) {
                    None => moves.push(ChessMove::simple(from, to)),
                    Some(target) => {
                        if target.color != color {
                            moves.push(ChessMove::simple(from, to));
                        }
                    }
                }
            }
        }
    }

    let rights = castling.for_color(color);
    let rank = match color {
        Color::White => 0u8,
        Color::Black => 7u8,
    };
    let king_start = Square::new(4, rank);

    if from != king_start {
        return;
    }

    if is_square_attacked(board, from, color.opponent()) {
        return;
    }

    if rights.kingside {
        let f_sq = Square::new(5, rank);
        let g_sq = Square::new(6, rank);
        let rook_sq = Square::new(7, rank);

        let path_clear = board.get(f_sq).is_none() && board.get(g_sq).is_none();
        let rook_present = matches!(
            board.get(rook_sq),
            Some(Piece { kind: PieceKind::Rook, color: c }) if c == color
        );
        let safe = !is_square_attacked(board, f_sq, color.opponent())
            && !is_square_attacked(board, g_sq, color.opponent());

        if path_clear && rook_present && safe {
            moves.push(ChessMove {
                from,
                to: g_sq,
                promotion: None,
                is_castling: true,
                is_en_passant: false,
            });
        }
    }

    if rights.queenside {
        let d_sq = Square::new(3, rank);
        let c_sq = Square::new(2, rank);
        let b_sq = Square::new(1, rank);
        let rook_sq = Square::new(0, rank);

        let path_clear =
            board.get(d_sq).is_none() && board.get(c_sq).is_none() && board.get(b_sq).is_none();
        let rook_present = matches!(
            board.get(rook_sq),
            Some(Piece { kind: PieceKind::Rook, color: c }) if c == color
        );
        let safe = !is_square_attacked(board, d_sq, color.opponent())
            && !is_square_attacked(board, c_sq, color.opponent());

        if path_clear && rook_present && safe {
            moves.push(ChessMove {
                from,
                to: c_sq,
                promotion: None,
                is_castling: true,
                is_en_passant: false,
            });
        }
    }
}

fn generate_pawn_moves(
    board: &Board,
    from: Square,
    color: Color,
    en_passant: Option<Square>,
    moves: &mut Vec<ChessMove>,
) {
    let dir = color.pawn_direction();
    let start_rank = color.pawn_start_rank();
    let promo_rank = color.promotion_rank();

    let mut add_move = |from: Square, to: Square, is_ep: bool| {
        if to.rank == promo_rank {
            for kind in [PieceKind::Queen, PieceKind::Rook, PieceKind::Bishop, PieceKind::Knight] {
                moves.push(ChessMove {
                    from,
                    to,
                    promotion: Some(kind),
                    is_castling: false,
                    is_en_passant: false,
                });
            }
        } else {
            moves.push(ChessMove {
                from,
                to,
                promotion: None,
                is_castling: false,
                is_en_passant: is_ep,
            });
        }
    };

    if let Some(one_ahead) = from.offset(0, dir)
        && board.get(one_ahead).is_none()
    {
        add_move(from, one_ahead, false);

        if from.rank == start_rank
            && let Some(two_ahead) = from.offset(0, dir * 2)
            && board.get(two_ahead).is_none()
        {
            add_move(from, two_ahead, false);
        }
    }

    for df in [-1i8, 1] {
        if let Some(to) = from.offset(df, dir) {
            if let Some(target) = board.get(to)
                && target.color != color
            {
                add_move(from, to, false);
            }

            if let Some(ep_sq) = en_passant
                && to == ep_sq
            {
                add_move(from, to, true);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Legal move generation (with check filtering) — `legal_moves` per §4.1
// ---------------------------------------------------------------------------

/// All legal moves for the side to move in `position`. A legal move is a
/// pseudo-legal move that does not leave or place the own king in check
/// (FIDE Art. 3).
pub fn legal_moves(position: &Position) -> Vec<ChessMove> {
    let pseudo_moves = generate_pseudo_legal_moves(position);
    let mut legal = Vec::with_capacity(pseudo_moves.len());

    for mv in pseudo_moves {
        let mut test_board = position.board.clone();
        apply_move_to_board(&mut test_board, &mv, position.turn);
        if !is_check(&Position { board: test_board, ..position.clone() }, position.turn) {
            legal.push(mv);
        }
    }

    legal
}

fn apply_move_to_board(board: &mut Board, mv: &ChessMove, color: Color) {
    let piece = board.get(mv.from).expect("no piece on from square");

    board.set(mv.from, None);

    if mv.is_castling {
        let rank = mv.from.rank;
        if mv.to.file == 6 {
            let rook = board.get(Square::new(7, rank));
            board.set(Square::new(7, rank), None);
            board.set(Square::new(5, rank), rook);
        } else if mv.to.file == 2 {
            let rook = board.get(Square::new(0, rank));
            board.set(Square::new(0, rank), None);
            board.set(Square::new(3, rank), rook);
        }
    }

    if mv.is_en_passant {
        let captured_rank = match color {
            Color::White => mv.to.rank - 1,
            Color::Black => mv.to.rank + 1,
        };
        board.set(Square::new(mv.to.file, captured_rank), None);
    }

    let placed_piece = if let Some(promo_kind) = mv.promotion {
        Piece::new(promo_kind, color)
    } else {
        piece
    };
    board.set(mv.to, Some(placed_piece));
}

/// Applies `mv` to `position`, returning the resulting position — `apply`
/// per §4.1. Precondition: `mv ∈ legal_moves(position)`. Updates castling
/// rights and the en passant target alongside the board.
pub fn apply(position: &Position, mv: &ChessMove) -> Position {
    let color = position.turn;
    let mut board = position.board.clone();
    apply_move_to_board(&mut board, mv, color);

    let mut castling = position.castling;
    if let Some(piece) = board.get(mv.to)
        && piece.kind == PieceKind::King
    {
        let rights = castling.for_color_mut(piece.color);
        rights.kingside = false;
        rights.queenside = false;
    }
    let strip_rook_rights = |sq: Square, castling: &mut CastlingRights| {
        if sq == Square::new(7, 0) {
            castling.white.kingside = false;
        }
        if sq == Square::new(0, 0) {
            castling.white.queenside = false;
        }
        if sq == Square::new(7, 7) {
            castling.black.kingside = false;
        }
        if sq == Square::new(0, 7) {
            castling.black.queenside = false;
        }
    };
    strip_rook_rights(mv.from, &mut castling);
    strip_rook_rights(mv.to, &mut castling);

    let moving_piece_kind = position.board.get(mv.from).map(|p| p.kind);
    let mut en_passant = None;
    if moving_piece_kind == Some(PieceKind::Pawn) {
        let rank_diff = (mv.to.rank as i8 - mv.from.rank as i8).abs();
        if rank_diff == 2 {
            let ep_rank = (mv.from.rank as i8 + color.pawn_direction()) as u8;
            en_passant = Some(Square::new(mv.from.file, ep_rank));
        }
    }

    Position {
        board,
        turn: color.opponent(),
        castling,
        en_passant,
    }
}

/// `terminal` per §4.1: only checkmate and stalemate are automatic — see
/// `DESIGN.md`'s Open Question resolution on automatic draws (insufficient
/// material / fivefold repetition / 75-move are claim/assert-only concerns
/// the engine handles itself, not pure-position terminality).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    None,
    Checkmate,
    Stalemate,
}

pub fn terminal(position: &Position, side_to_move: Color) -> Terminal {
    debug_assert_eq!(position.turn, side_to_move);
    let moves = legal_moves(position);
    if !moves.is_empty() {
        return Terminal::None;
    }
    if is_check(position, side_to_move) {
        Terminal::Checkmate
    } else {
        Terminal::Stalemate
    }
}

/// `is_reversible` per §4.1: a move is irreversible (resets the halfmove
/// clock) if it is a pawn advance or a capture.
pub fn is_reversible(mv: &ChessMove, position: &Position) -> bool {
    let moving_piece = position.board.get(mv.from);
    let is_pawn_move = matches!(moving_piece, Some(p) if p.kind == PieceKind::Pawn);
    let is_capture = position.board.get(mv.to).is_some() || mv.is_en_passant;
    !(is_pawn_move || is_capture)
}

// ---------------------------------------------------------------------------
// Position fingerprinting — `fingerprint` per §4.1 / GLOSSARY
// ---------------------------------------------------------------------------

/// A Zobrist-style table of random 128-bit constants, generated
/// deterministically at compile time from a fixed seed (splitmix64) so the
/// fingerprint is stable across process restarts without shipping a literal
/// table by hand.
struct ZobristTable {
    /// [piece_kind][color][square]
    pieces: [[[u128; 64]; 2]; 6],
    side_to_move: u128,
    castling: [u128; 4],
    en_passant_file: [u128; 8],
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn splitmix128(state: &mut u64) -> u128 {
    let hi = splitmix64(state) as u128;
    let lo = splitmix64(state) as u128;
    (hi << 64) | lo
}

impl ZobristTable {
    fn new() -> Self {
        let mut state: u64 = 0xC0FFEE_CAFE_F00D;
        let mut pieces = [[[0u128; 64]; 2]; 6];
        for kind in pieces.iter_mut() {
            for color in kind.iter_mut() {
                for sq in color.iter_mut() {
                    *sq = splitmix128(&mut state);
                }
            }
        }
        let side_to_move = splitmix128(&mut state);
        let mut castling = [0u128; 4];
        for c in castling.iter_mut() {
            *c = splitmix128(&mut state);
        }
        let mut en_passant_file = [0u128; 8];
        for f in en_passant_file.iter_mut() {
            *f = splitmix128(&mut state);
        }
        Self {
            pieces,
            side_to_move,
            castling,
            en_passant_file,
        }
    }
}

fn zobrist_table() -> &'static ZobristTable {
    use std::sync::OnceLock;
    static TABLE: OnceLock<ZobristTable> = OnceLock::new();
    TABLE.get_or_init(ZobristTable::new)
}

/// A 128-bit opaque value equal for equivalent positions (same piece
/// placement, same side to move, same castling rights, same en passant
/// target) — the GLOSSARY's "Fingerprint".
pub fn fingerprint(position: &Position) -> Fingerprint {
    let table = zobrist_table();
    let mut hash: u128 = 0;

    for rank in 0..8u8 {
        for file in 0..8u8 {
            let sq = Square::new(file, rank);
            if let Some(piece) = position.board.get(sq) {
                let kind_idx = match piece.kind {
                    PieceKind::King => 0,
                    PieceKind::Queen => 1,
                    PieceKind::Rook => 2,
                    PieceKind::Bishop => 3,
                    PieceKind::Knight => 4,
                    PieceKind::Pawn => 5,
                };
                let color_idx = match piece.color {
                    Color::White => 0,
                    Color::Black => 1,
                };
                hash ^= table.pieces[kind_idx][color_idx][sq.index()];
            }
        }
    }

    if position.turn == Color::Black {
        hash ^= table.side_to_move;
    }

    if position.castling.white.kingside {
        hash ^= table.castling[0];
    }
    if position.castling.white.queenside {
        hash ^= table.castling[1];
    }
    if position.castling.black.kingside {
        hash ^= table.castling[2];
    }
    if position.castling.black.queenside {
        hash ^= table.castling[3];
    }

    if let Some(ep) = position.en_passant {
        hash ^= table.en_passant_file[ep.file as usize];
    }

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starting_position() -> Position {
        Position {
            board: Board::starting_position(),
            turn: Color::White,
            castling: CastlingRights::default(),
            en_passant: None,
        }
    }

    #[test]
    fn starting_position_has_20_moves() {
        let pos = starting_position();
        assert_eq!(legal_moves(&pos).len(), 20);
    }

    #[test]
    fn starting_position_not_in_check() {
        let pos = starting_position();
        assert!(!is_check(&pos, Color::White));
        assert!(!is_check(&pos, Color::Black));
    }

    #[test]
    fn fingerprint_is_stable_and_position_sensitive() {
        let pos = starting_position();
        assert_eq!(fingerprint(&pos), fingerprint(&pos));

        let mv = ChessMove::simple(Square::new(4, 1), Square::new(4, 3));
        let moved = apply(&pos, &mv);
        assert_ne!(fingerprint(&pos), fingerprint(&moved));
    }

    #[test]
    fn fingerprint_round_trip_back_to_start_matches() {
        // e2-e4 Nf6-... roundabout back to the same position should collide.
        let pos = starting_position();
        let after_knight_out = apply(&pos, &ChessMove::simple(Square::new(1, 0), Square::new(2, 2)));
        let after_knight_back = apply(&after_knight_out, &ChessMove::simple(Square::new(2, 2), Square::new(1, 0)));
        assert_eq!(fingerprint(&pos), fingerprint(&after_knight_back));
    }

    #[test]
    fn en_passant_move_generated() {
        let mut board = Board::default();
        board.set(Square::new(4, 0), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(4, 7), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(Square::new(4, 4), Some(Piece::new(PieceKind::Pawn, Color::White)));
        board.set(Square::new(3, 4), Some(Piece::new(PieceKind::Pawn, Color::Black)));

        let castling = CastlingRights {
            white: SideCastlingRights { kingside: false, queenside: false },
            black: SideCastlingRights { kingside: false, queenside: false },
        };
        let pos = Position {
            board,
            turn: Color::White,
            castling,
            en_passant: Some(Square::new(3, 5)),
        };
        let moves = legal_moves(&pos);
        let ep_moves: Vec<_> = moves.iter().filter(|m| m.is_en_passant).collect();
        assert_eq!(ep_moves.len(), 1);
        assert_eq!(ep_moves[0].from, Square::new(4, 4));
        assert_eq!(ep_moves[0].to, Square::new(3, 5));
    }

    #[test]
    fn castling_available_in_clear_position() {
        let mut board = Board::default();
        board.set(Square::new(4, 0), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(7, 0), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(0, 0), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(4, 7), Some(Piece::new(PieceKind::King, Color::Black)));

        let castling = CastlingRights {
            white: SideCastlingRights { kingside: true, queenside: true },
            black: SideCastlingRights { kingside: false, queenside: false },
        };
        let pos = Position {
            board,
            turn: Color::White,
            castling,
            en_passant: None,
        };
        let moves = legal_moves(&pos);
        let castling_moves: Vec<_> = moves.iter().filter(|m| m.is_castling).collect();
        assert_eq!(castling_moves.len(), 2);
    }

    #[test]
    fn is_reversible_false_for_pawn_move_and_capture() {
        let pos = starting_position();
        let pawn_move = ChessMove::simple(Square::new(4, 1), Square::new(4, 3));
        assert!(!is_reversible(&pawn_move, &pos));

        let mut board = Board::default();
        board.set(Square::new(0, 0), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(7, 7), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(Square::new(3, 3), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(3, 6), Some(Piece::new(PieceKind::Rook, Color::Black)));
        let pos = Position {
            board,
            turn: Color::White,
            castling: CastlingRights::default(),
            en_passant: None,
        };
        let capture = ChessMove::simple(Square::new(3, 3), Square::new(3, 6));
        assert!(!is_reversible(&capture, &pos));

        let quiet_rook_move = ChessMove::simple(Square::new(3, 3), Square::new(3, 4));
        assert!(is_reversible(&quiet_rook_move, &pos));
    }

    #[test]
    fn checkmate_detected_for_back_rank_mate() {
        let mut board = Board::default();
        board.set(Square::new(0, 7), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(Square::new(1, 6), Some(Piece::new(PieceKind::Pawn, Color::Black)));
        board.set(Square::new(2, 6), Some(Piece::new(PieceKind::Pawn, Color::Black)));
        board.set(Square::new(0, 0), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(Square::new(4, 4), Some(Piece::new(PieceKind::King, Color::White)));
        let pos = Position {
            board,
            turn: Color::Black,
            castling: CastlingRights::default(),
            en_passant: None,
        };
        assert_eq!(terminal(&pos, Color::Black), Terminal::Checkmate);
    }
}
