//! Persistent game storage — compact binary format, zstd-compressed once a
//! game is finished.
//!
//! # Storage strategy
//!
//! - **Active games** (Searching/Invited/Started): saved as uncompressed
//!   `.ksp` files after every state-changing command, so a server restart
//!   can rebuild live `Game`s (`Game::restore`) instead of losing them.
//! - **Finished games**: compressed with zstd level 19 into `.ksp.zst`
//!   files, then the uncompressed active file is removed.
//!
//! This is restore/crash-recovery and archival, NOT a per-move analysis
//! replay API — the teacher's `replay()`/`replay_full()`/`export.rs` have no
//! counterpart here (see DESIGN.md).
//!
//! # Binary format (`.ksp`)
//!
//! ```text
//! Offset  Size   Field
//! ──────  ────   ─────
//! 0       4      Magic bytes: "KSPL"
//! 4       1      Format version (currently 1)
//! 5       16     Game UUID (big-endian bytes)
//! 21      8      host_id (big-endian u64)
//! 29      1      away_id present (0/1)
//! 30      8      away_id (big-endian u64, meaningless if not present)
//! 38      1      invited_id present (0/1)
//! 39      8      invited_id (big-endian u64, meaningless if not present)
//! 47      8      main_thinking_time (big-endian i64)
//! 55      8      fixed_extra_time (big-endian i64)
//! 63      8      time_increment_per_turn (big-endian i64)
//! 71      8      host_time (big-endian i64)
//! 79      8      away_time (big-endian i64)
//! 87      1      winner (0=None, 1=Host, 2=Away, 3=Draw)
//! 88      1      conclusion (0=None..7=AgreedDraw, see encode_conclusion)
//! 89      4      host_elo_delta (big-endian i32, only meaningful if ended)
//! 93      4      away_elo_delta (big-endian i32, only meaningful if ended)
//! 97      8      opened_at (big-endian i64)
//! 105     1      started_at present (0/1)
//! 106     8      started_at (big-endian i64, meaningless if not present)
//! 114     1      ended_at present (0/1)
//! 115     8      ended_at (big-endian i64, meaningless if not present)
//! 123     2      move count (big-endian u16, max 65535 half-moves)
//!
//! Header total: 125 bytes
//!
//! 125..   2×N    Encoded moves (2 bytes each, same packing as the teacher):
//!                  Bits 0–5:   from square (0–63, rank*8+file)
//!                  Bits 6–11:  to square (0–63)
//!                  Bits 12–14: promotion (0=none, 1=Q, 2=R, 3=B, 4=N)
//!                  Bit  15:    reserved (0)
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::engine::{Game, GameId, TimeControl, UserId};
use crate::engine::GameModeKey;
use crate::types::{ChessMove, Conclusion, PieceKind, Square, Winner};

const MAGIC: &[u8; 4] = b"KSPL";
const FORMAT_VERSION: u8 = 1;
const ZSTD_COMPRESSION_LEVEL: i32 = 19;
const HEADER_LEN: usize = 125;

// ---------------------------------------------------------------------------
// Compact move encoding (2 bytes per move, kept from the teacher verbatim)
// ---------------------------------------------------------------------------

fn encode_move(mv: &ChessMove) -> u16 {
    let from_idx = mv.from.index() as u16;
    let to_idx = mv.to.index() as u16;
    let promo_bits: u16 = match mv.promotion {
        None => 0,
        Some(PieceKind::Queen) => 1,
        Some(PieceKind::Rook) => 2,
        Some(PieceKind::Bishop) => 3,
        Some(PieceKind::Knight) => 4,
        Some(_) => 0,
    };
    from_idx | (to_idx << 6) | (promo_bits << 12)
}

/// Decodes a packed move. `is_castling`/`is_en_passant` are always decoded
/// `false` — `Game::restore` rederives them by replaying through `movegen`,
/// the same way a wire-submitted move does (see DESIGN.md's engine.rs
/// bug-fix note).
fn decode_move(encoded: u16) -> ChessMove {
    let from_idx = (encoded & 0x3F) as usize;
    let to_idx = ((encoded >> 6) & 0x3F) as usize;
    let promo = (encoded >> 12) & 0x07;

    let from = Square::new((from_idx % 8) as u8, (from_idx / 8) as u8);
    let to = Square::new((to_idx % 8) as u8, (to_idx / 8) as u8);
    let promotion = match promo {
        1 => Some(PieceKind::Queen),
        2 => Some(PieceKind::Rook),
        3 => Some(PieceKind::Bishop),
        4 => Some(PieceKind::Knight),
        _ => None,
    };
    ChessMove {
        from,
        to,
        promotion,
        is_castling: false,
        is_en_passant: false,
    }
}

fn encode_winner(w: Winner) -> u8 {
    match w {
        Winner::None => 0,
        Winner::Host => 1,
        Winner::Away => 2,
        Winner::Draw => 3,
    }
}

fn decode_winner(b: u8) -> Winner {
    match b {
        1 => Winner::Host,
        2 => Winner::Away,
        3 => Winner::Draw,
        _ => Winner::None,
    }
}

fn encode_conclusion(c: Conclusion) -> u8 {
    match c {
        Conclusion::None => 0,
        Conclusion::Checkmate => 1,
        Conclusion::Resignation => 2,
        Conclusion::OutOfTime => 3,
        Conclusion::Stalemate => 4,
        Conclusion::ThreefoldRepetition => 5,
        Conclusion::FiftyMoveRule => 6,
        Conclusion::AgreedDraw => 7,
    }
}

fn decode_conclusion(b: u8) -> Conclusion {
    match b {
        1 => Conclusion::Checkmate,
        2 => Conclusion::Resignation,
        3 => Conclusion::OutOfTime,
        4 => Conclusion::Stalemate,
        5 => Conclusion::ThreefoldRepetition,
        6 => Conclusion::FiftyMoveRule,
        7 => Conclusion::AgreedDraw,
        _ => Conclusion::None,
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

pub fn serialize_game(game: &Game) -> Result<Vec<u8>, String> {
    let move_count = game.move_log.len();
    if move_count > u16::MAX as usize {
        return Err("game has more half-moves than the archive format supports".to_string());
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + move_count * 2);
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(game.id.as_bytes());
    buf.extend_from_slice(&game.host_id.to_be_bytes());
    match game.away_id {
        Some(away) => {
            buf.push(1);
            buf.extend_from_slice(&away.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0u64.to_be_bytes());
        }
    }
    match game.invited_id {
        Some(invited) => {
            buf.push(1);
            buf.extend_from_slice(&invited.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0u64.to_be_bytes());
        }
    }
    buf.extend_from_slice(&game.time_control.main_thinking_time.to_be_bytes());
    buf.extend_from_slice(&game.time_control.fixed_extra_time.to_be_bytes());
    buf.extend_from_slice(&game.time_control.time_increment_per_turn.to_be_bytes());
    buf.extend_from_slice(&game.host_time.to_be_bytes());
    buf.extend_from_slice(&game.away_time.to_be_bytes());
    buf.push(encode_winner(game.winner));
    buf.push(encode_conclusion(game.conclusion));
    buf.extend_from_slice(&game.host_elo_delta.unwrap_or(0).to_be_bytes());
    buf.extend_from_slice(&game.away_elo_delta.unwrap_or(0).to_be_bytes());
    buf.extend_from_slice(&game.opened_at.to_be_bytes());
    match game.started_at {
        Some(t) => {
            buf.push(1);
            buf.extend_from_slice(&t.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0i64.to_be_bytes());
        }
    }
    match game.ended_at {
        Some(t) => {
            buf.push(1);
            buf.extend_from_slice(&t.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0i64.to_be_bytes());
        }
    }
    buf.extend_from_slice(&(move_count as u16).to_be_bytes());

    debug_assert_eq!(buf.len(), HEADER_LEN);

    for mv in &game.move_log {
        buf.extend_from_slice(&encode_move(mv).to_le_bytes());
    }

    Ok(buf)
}

pub fn deserialize_game(data: &[u8]) -> Result<Game, String> {
    if data.len() < HEADER_LEN {
        return Err("archive header too short".to_string());
    }
    if &data[0..4] != MAGIC {
        return Err("invalid magic bytes".to_string());
    }
    let version = data[4];
    if version != FORMAT_VERSION {
        return Err(format!("unsupported archive format version {version}"));
    }

    let id = Uuid::from_bytes(data[5..21].try_into().unwrap());
    let host_id = UserId::from_be_bytes(data[21..29].try_into().unwrap());
    let away_present = data[29] != 0;
    let away_raw = UserId::from_be_bytes(data[30..38].try_into().unwrap());
    let away_id = away_present.then_some(away_raw);
    let invited_present = data[38] != 0;
    let invited_raw = UserId::from_be_bytes(data[39..47].try_into().unwrap());
    let invited_id = invited_present.then_some(invited_raw);

    let main_thinking_time = i64::from_be_bytes(data[47..55].try_into().unwrap());
    let fixed_extra_time = i64::from_be_bytes(data[55..63].try_into().unwrap());
    let time_increment_per_turn = i64::from_be_bytes(data[63..71].try_into().unwrap());
    let host_time = i64::from_be_bytes(data[71..79].try_into().unwrap());
    let away_time = i64::from_be_bytes(data[79..87].try_into().unwrap());
    let winner = decode_winner(data[87]);
    let conclusion = decode_conclusion(data[88]);
    let host_elo_delta_raw = i32::from_be_bytes(data[89..93].try_into().unwrap());
    let away_elo_delta_raw = i32::from_be_bytes(data[93..97].try_into().unwrap());
    let opened_at = i64::from_be_bytes(data[97..105].try_into().unwrap());
    let started_present = data[105] != 0;
    let started_raw = i64::from_be_bytes(data[106..114].try_into().unwrap());
    let ended_present = data[114] != 0;
    let ended_raw = i64::from_be_bytes(data[115..123].try_into().unwrap());
    let move_count = u16::from_be_bytes(data[123..125].try_into().unwrap()) as usize;

    let expected_len = HEADER_LEN + move_count * 2;
    if data.len() < expected_len {
        return Err(format!("archive truncated: expected {expected_len} bytes, got {}", data.len()));
    }

    let mut moves = Vec::with_capacity(move_count);
    for i in 0..move_count {
        let offset = HEADER_LEN + i * 2;
        let encoded = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap());
        moves.push(decode_move(encoded));
    }

    let ended_at = ended_present.then_some(ended_raw);
    let started_at = started_present.then_some(started_raw);
    let host_elo_delta = ended_at.map(|_| host_elo_delta_raw);
    let away_elo_delta = ended_at.map(|_| away_elo_delta_raw);

    Ok(Game::restore(
        id,
        host_id,
        away_id,
        invited_id,
        TimeControl {
            main_thinking_time,
            fixed_extra_time,
            time_increment_per_turn,
            mode: GameModeKey::Chess,
        },
        host_time,
        away_time,
        winner,
        conclusion,
        host_elo_delta,
        away_elo_delta,
        opened_at,
        started_at,
        ended_at,
        moves,
    ))
}

// ---------------------------------------------------------------------------
// GameStorage — file-based persistence manager
// ---------------------------------------------------------------------------

/// Directory layout:
/// ```text
/// <base_dir>/
///   active/    # Searching/Invited/Started games (.ksp)
///   archive/   # Finished games, zstd-compressed (.ksp.zst)
/// ```
pub struct GameStorage {
    base_dir: PathBuf,
    active_dir: PathBuf,
    archive_dir: PathBuf,
}

impl GameStorage {
    pub fn new(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let active_dir = base_dir.join("active");
        let archive_dir = base_dir.join("archive");
        fs::create_dir_all(&active_dir)?;
        fs::create_dir_all(&archive_dir)?;
        log::info!("game storage initialized at {}", base_dir.display());
        Ok(Self {
            base_dir,
            active_dir,
            archive_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn active_path(&self, game_id: &GameId) -> PathBuf {
        self.active_dir.join(format!("{game_id}.ksp"))
    }

    fn archive_path(&self, game_id: &GameId) -> PathBuf {
        self.archive_dir.join(format!("{game_id}.ksp.zst"))
    }

    /// Persists an active game, uncompressed, for crash recovery. Called
    /// after every command that mutates a live game.
    pub fn save_active(&self, game: &Game) -> Result<(), String> {
        let data = serialize_game(game)?;
        let path = self.active_path(&game.id);
        let temp_path = self.active_dir.join(format!("{}.ksp.tmp", game.id));
        fs::write(&temp_path, &data).map_err(|e| format!("failed to write temp file: {e}"))?;
        fs::rename(&temp_path, &path).map_err(|e| format!("failed to rename temp file: {e}"))?;
        Ok(())
    }

    /// Compresses a finished game into the archive and removes its active
    /// snapshot. Returns the compressed size in bytes.
    pub fn archive_game(&self, game: &Game) -> Result<usize, String> {
        let raw = serialize_game(game)?;
        let compressed = zstd::encode_all(raw.as_slice(), ZSTD_COMPRESSION_LEVEL)
            .map_err(|e| format!("zstd compression failed: {e}"))?;
        let archive_path = self.archive_path(&game.id);
        fs::write(&archive_path, &compressed).map_err(|e| format!("failed to write archive: {e}"))?;
        let active_path = self.active_path(&game.id);
        if active_path.exists() {
            let _ = fs::remove_file(&active_path);
        }
        log::info!(
            "archived game {}: {} -> {} bytes ({} moves)",
            game.id,
            raw.len(),
            compressed.len(),
            game.move_log.len()
        );
        Ok(compressed.len())
    }

    pub fn load_active(&self, game_id: &GameId) -> Result<Game, String> {
        let path = self.active_path(game_id);
        let data = fs::read(&path).map_err(|e| format!("failed to read active game {game_id}: {e}"))?;
        deserialize_game(&data)
    }

    pub fn load_archive(&self, game_id: &GameId) -> Result<Game, String> {
        let path = self.archive_path(game_id);
        let compressed = fs::read(&path).map_err(|e| format!("failed to read archive {game_id}: {e}"))?;
        let decompressed =
            zstd::decode_all(compressed.as_slice()).map_err(|e| format!("zstd decompression failed: {e}"))?;
        deserialize_game(&decompressed)
    }

    /// All active games on disk, for rebuilding `HubRegistry` at startup.
    pub fn list_active_on_disk(&self) -> Result<Vec<GameId>, String> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.active_dir).map_err(|e| format!("failed to read active directory: {e}"))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {e}"))?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if let Some(id_str) = filename.strip_suffix(".ksp")
                && let Ok(id) = Uuid::parse_str(id_str)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// All archived game ids, for `GET /games/completed`/`GET
    /// /games/common_completed` to scan and filter by participant.
    pub fn list_archive_ids(&self) -> Result<Vec<GameId>, String> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.archive_dir).map_err(|e| format!("failed to read archive directory: {e}"))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {e}"))?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if let Some(id_str) = filename.strip_suffix(".ksp.zst")
                && let Ok(id) = Uuid::parse_str(id_str)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn remove_active(&self, game_id: &GameId) -> Result<(), String> {
        let path = self.active_path(game_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| format!("failed to remove active game file: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side as GameSide;

    fn time_control() -> TimeControl {
        TimeControl {
            main_thinking_time: 600,
            fixed_extra_time: 0,
            time_increment_per_turn: 5,
            mode: GameModeKey::Chess,
        }
    }

    #[test]
    fn serialize_deserialize_roundtrips_a_finished_game() {
        let mut game = Game::new_searching(Uuid::new_v4(), 1, time_control(), 0);
        game.start(2, 0);
        let e2e4 = ChessMove::simple(Square::from_algebraic("e2").unwrap(), Square::from_algebraic("e4").unwrap());
        game.make_move(GameSide::Host, e2e4, 1).unwrap();
        let e7e5 = ChessMove::simple(Square::from_algebraic("e7").unwrap(), Square::from_algebraic("e5").unwrap());
        game.make_move(GameSide::Away, e7e5, 2).unwrap();
        game.resign(GameSide::Host, 3).unwrap();
        game.settle_elo(1000, 1000);

        let data = serialize_game(&game).unwrap();
        let restored = deserialize_game(&data).unwrap();

        assert_eq!(restored.id, game.id);
        assert_eq!(restored.host_id, game.host_id);
        assert_eq!(restored.away_id, game.away_id);
        assert_eq!(restored.move_log, game.move_log);
        assert_eq!(restored.winner, game.winner);
        assert_eq!(restored.conclusion, game.conclusion);
        assert_eq!(restored.host_elo_delta, game.host_elo_delta);
        assert_eq!(restored.position, game.position);
    }

    #[test]
    fn save_archive_and_load_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!("kasupel_storage_test_{}", Uuid::new_v4()));
        let storage = GameStorage::new(&dir).unwrap();

        let mut game = Game::new_searching(Uuid::new_v4(), 1, time_control(), 0);
        game.start(2, 0);
        let e2e4 = ChessMove::simple(Square::from_algebraic("e2").unwrap(), Square::from_algebraic("e4").unwrap());
        game.make_move(GameSide::Host, e2e4, 1).unwrap();

        storage.save_active(&game).unwrap();
        let loaded = storage.load_active(&game.id).unwrap();
        assert_eq!(loaded.move_log.len(), 1);

        game.resign(GameSide::Away, 2).unwrap();
        let size = storage.archive_game(&game).unwrap();
        assert!(size > 0);
        assert!(!storage.active_path(&game.id).exists());

        let archived = storage.load_archive(&game.id).unwrap();
        assert_eq!(archived.conclusion, Conclusion::Resignation);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_invited_game_restores_with_invited_id_and_no_away_id() {
        let game = Game::new_invited(Uuid::new_v4(), 1, 2, time_control(), 0);

        let data = serialize_game(&game).unwrap();
        let restored = deserialize_game(&data).unwrap();

        assert_eq!(restored.away_id, None);
        assert_eq!(restored.invited_id, Some(2));
    }
}
