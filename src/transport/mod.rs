pub mod control_messages;
pub mod packet;
pub mod reliable_session;
pub mod send_socket;
pub mod sequence_number;
pub mod zerocode;
