pub mod diffie_hellman;
