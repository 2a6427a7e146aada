pub mod rest;
pub mod ws;

pub use rest::{
    create_game_handler, delete_game_handler, get_game_handler, join_game_handler,
    leave_game_handler, update_player_handler,
};
pub use ws::websocket_handler;
