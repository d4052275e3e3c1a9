//! Interface de linha de comando do qagen baseada em clap.
//!
//! Define a struct [`Cli`] com os subcomandos [`Command`] (admit, tick, run,
//! status, ...) e as flags globais (--config, --verbose, --json).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// qagen: gera perguntas e respostas a partir de itens de conteúdo, em lotes.
#[derive(Debug, Parser)]
#[command(name = "qagen", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `qagen.toml`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (logs em nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Imprime os resultados em JSON em vez de texto formatado.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Admite um novo lote com os ids de item informados.
    Admit {
        /// Ids dos itens de origem.
        #[arg(required = true, num_args = 1..)]
        ids: Vec<u64>,

        /// Tipo de destino dos artefatos (sobrescreve `[settings]`).
        #[arg(long)]
        target_type: Option<String>,

        /// Modelo usado na geração (sobrescreve `[settings]`).
        #[arg(long)]
        model: Option<String>,
    },

    /// Executa um único tick agora, ignorando o gatilho.
    Tick,

    /// Mantém o processador rodando até Ctrl-C.
    Run,

    /// Mostra um lote com progresso, ou o resumo de todos os lotes.
    Status {
        /// Id do lote (`batch_...`).
        batch: Option<String>,
    },

    /// Contagens agregadas da fila e estado do processador.
    Stats,

    /// Estado de processamento de um item.
    Item { id: u64 },

    /// Recoloca um item com falha na fila.
    Retry { id: u64 },

    /// Lista os itens com falha, mais recentes primeiro.
    Failed {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Agenda um tick quase imediato, mesmo que já exista um agendado.
    ForceStart,

    /// Cancela um lote; o item em andamento termina normalmente.
    Cancel { batch: String },

    /// Remove rascunhos órfãos antigos.
    Reap,

    /// Remove lotes finalizados fora da janela de retenção.
    Purge,

    /// Histórico de processamento e estatísticas.
    History {
        /// Número de registros (padrão: `history_limit` da configuração).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manutenção do cache de geração.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheAction {
    /// Número de entradas e TTL.
    Stats,
    /// Apaga todas as entradas.
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_admit_subcommand() {
        let cli = Cli::parse_from(["qagen", "admit", "3", "5", "8", "--target-type", "faq"]);
        match cli.command {
            Command::Admit {
                ids,
                target_type,
                model,
            } => {
                assert_eq!(ids, vec![3, 5, 8]);
                assert_eq!(target_type.as_deref(), Some("faq"));
                assert!(model.is_none());
            }
            _ => panic!("expected Admit command"),
        }
    }

    #[test]
    fn admit_requires_ids() {
        assert!(Cli::try_parse_from(["qagen", "admit"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "qagen",
            "--config",
            "/etc/qagen.toml",
            "--verbose",
            "--json",
            "status",
            "batch_abc",
        ]);
        assert!(cli.verbose);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/qagen.toml")));
        assert!(matches!(cli.command, Command::Status { batch: Some(ref b) } if b == "batch_abc"));
    }

    #[test]
    fn cli_parses_cache_subcommand() {
        let cli = Cli::parse_from(["qagen", "cache", "clear"]);
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Clear
            }
        ));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
