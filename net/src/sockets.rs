/*
Socket primitives built on the standard library TcpStream and TcpListener.
Each outbound connection is written by its own thread; inbound connections are accepted by one
thread and handed to a fixed pool of workers.
*/
pub mod delivery;
pub mod listener;
pub mod tcp_channel;
